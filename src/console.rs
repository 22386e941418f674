//! Line-oriented driver for running the engine from a terminal.

use std::{path::PathBuf, rc::Rc, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local, Offset, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    db::{Database, FocusRepository},
    log_info,
    models::Task,
    presenter::{format_short_time, format_total_time, FocusViewState},
    scheduler::{Clock, SystemClock, TokioScheduler},
    settings::{EngineConfig, SettingsStore},
    sound::{AmbientSound, PlayerFactory, SilentPlayerFactory},
    stats::{total_focus_seconds, weekly_totals},
    FocusApp,
};

const ENABLE_LOGS: bool = true;

const BOUNDARY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    Sound(AmbientSound),
    Toggle,
    Volume(f32),
    Plan { title: String, minutes: u32 },
    Background,
    Foreground,
    Status,
    Stats,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let rest: Vec<&str> = words.collect();

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "stop" => Command::Stop,
            "toggle" => Command::Toggle,
            "background" => Command::Background,
            "foreground" => Command::Foreground,
            "status" => Command::Status,
            "stats" => Command::Stats,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "sound" => {
                let name = rest.first().ok_or_else(|| anyhow!("usage: sound <name>"))?;
                Command::Sound(name.parse()?)
            }
            "volume" => {
                let level = rest.first().ok_or_else(|| anyhow!("usage: volume <0-1>"))?;
                Command::Volume(
                    level
                        .parse()
                        .with_context(|| format!("invalid volume {level}"))?,
                )
            }
            "plan" => {
                let Some((minutes, title)) = rest.split_last() else {
                    bail!("usage: plan <title> <minutes>");
                };
                if title.is_empty() {
                    bail!("usage: plan <title> <minutes>");
                }
                Command::Plan {
                    title: title.join(" "),
                    minutes: minutes
                        .parse()
                        .with_context(|| format!("invalid minutes {minutes}"))?,
                }
            }
            other => bail!("unknown command {other}"),
        };
        Ok(command)
    }
}

const HELP: &str = "commands: start | pause | resume | stop | sound <none|whiteNoise|birds|nightForest|rain> \
| toggle | volume <0-1> | plan <title> <minutes> | background | foreground | status | stats | quit";

fn player_factory(data_dir: &std::path::Path) -> Rc<dyn PlayerFactory> {
    #[cfg(feature = "rodio-output")]
    {
        match crate::sound::RodioPlayerFactory::new(data_dir.join("sounds")) {
            Ok(factory) => return Rc::new(factory),
            Err(err) => crate::log_warn!("Audio output unavailable, sounds are muted: {:#}", err),
        }
    }
    #[cfg(not(feature = "rodio-output"))]
    {
        let _ = data_dir;
        log_info!("Built without audio output; ambient sounds are muted");
    }
    Rc::new(SilentPlayerFactory)
}

/// Runs the console until `quit` or end of input. Must be polled inside a
/// `LocalSet`.
pub async fn run(data_dir: PathBuf) -> Result<()> {
    let database = Database::new(data_dir.join("focusjournal.sqlite3"))?;
    let repo: Rc<dyn FocusRepository> = Rc::new(database.clone());
    let settings = Rc::new(SettingsStore::new(data_dir.join("settings.json"))?);
    let config = EngineConfig::from_env();
    let offset = Local::now().offset().fix();

    let app = FocusApp::new(
        repo.clone(),
        Rc::new(SystemClock),
        Rc::new(TokioScheduler),
        player_factory(&data_dir),
        config,
        offset,
    );
    app.accountant.attach_settings(settings);

    // Startup problems are already on the error channel and in the view.
    let _ = app.accountant.recover_interrupted_sessions();
    let _ = app.accountant.load_current_task();
    let _ = app.accountant.restore_sound_settings();

    println!("{HELP}");
    print_view(&app.presenter.view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut boundary = tokio::time::interval(BOUNDARY_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = boundary.tick() => {
                if let Ok(true) = app.accountant.check_task_boundary() {
                    print_view(&app.presenter.view());
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(&app, repo.as_ref(), command),
                    Err(err) => println!("{err:#}"),
                }
            }
        }
    }

    if app.accountant.active_session().is_some() {
        log_info!("Stopping the running session before exit");
        let _ = app.accountant.stop_focus();
    }
    app.accountant.sound().stop();
    Ok(())
}

fn execute(app: &FocusApp, repo: &dyn FocusRepository, command: Command) {
    let accountant = &app.accountant;
    let outcome: Result<()> = match command {
        Command::Start => accountant.start_focus().map_err(Error::from),
        Command::Pause => accountant.pause_focus().map_err(Error::from),
        Command::Resume => accountant.resume_focus().map_err(Error::from),
        Command::Stop => accountant
            .stop_focus()
            .map(|total| println!("stopped at {}", crate::presenter::format_clock(total)))
            .map_err(Error::from),
        Command::Sound(sound) => accountant.select_sound(sound).map_err(Error::from),
        Command::Toggle => {
            let playing = accountant.toggle_sound_playback();
            println!("sound {}", if playing { "playing" } else { "paused" });
            Ok(())
        }
        Command::Volume(level) => accountant
            .set_volume(level)
            .map(|applied| println!("volume {applied:.2}"))
            .map_err(Error::from),
        Command::Plan { title, minutes } => plan_task(app, repo, title, minutes),
        Command::Background => accountant.handle_suspend().map_err(Error::from),
        Command::Foreground => {
            accountant.handle_resume_from_suspend();
            Ok(())
        }
        Command::Status => Ok(()),
        Command::Stats => {
            let offset = Local::now().offset().fix();
            focus_report(repo, SystemClock.now(), offset).map(|report| println!("{report}"))
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(err) = outcome {
        println!("error: {err}");
    }
    print_view(&app.presenter.view());
}

fn plan_task(app: &FocusApp, repo: &dyn FocusRepository, title: String, minutes: u32) -> Result<()> {
    let now = SystemClock.now();
    let task = Task::new(title, now, now + ChronoDuration::minutes(i64::from(minutes)));
    repo.insert_task(&task)?;
    log_info!("Planned task {} for {} minutes", task.id, minutes);
    app.accountant.check_task_boundary()?;
    Ok(())
}

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// This week's completed focus per day plus the lifetime total.
fn focus_report(repo: &dyn FocusRepository, now: DateTime<Utc>, offset: FixedOffset) -> Result<String> {
    let recent = repo
        .fetch_sessions_since(now - ChronoDuration::days(8))
        .context("failed to load this week's sessions")?;
    let week = weekly_totals(&recent, now, offset);

    let mut lifetime = 0;
    for task in repo.list_tasks().context("failed to list tasks")? {
        let sessions = repo.fetch_all_sessions_for_task(&task.id)?;
        lifetime += total_focus_seconds(&sessions);
    }

    let days: Vec<String> = WEEKDAYS
        .iter()
        .zip(week.daily_seconds)
        .map(|(day, seconds)| format!("{day} {}", format_short_time(seconds as i64)))
        .collect();
    Ok(format!(
        "week of {}: {} (lifetime {})\n  {}",
        week.week_start,
        format_total_time(week.total() as i64),
        format_total_time(lifetime as i64),
        days.join(" | ")
    ))
}

fn print_view(view: &FocusViewState) {
    match &view.task {
        Some(task) => println!(
            "[{}] {} ({}, planned {}, focused {})",
            task.window, task.title, view.timer.state.as_str(), task.planned_duration, task.focused_time
        ),
        None => println!("[no task scheduled] ({})", view.timer.state.as_str()),
    }
    println!(
        "  {}  {:>3.0}%  sound: {}{}",
        view.timer.display,
        view.timer.progress * 100.0,
        view.sound.display_name,
        if view.sound.is_playing { " (playing)" } else { "" }
    );
    if let Some(notice) = &view.error {
        println!("  ! {}", notice.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_verbs() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!(" Pause ".parse::<Command>().unwrap(), Command::Pause);
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn parses_sound_and_volume() {
        assert_eq!(
            "sound rain".parse::<Command>().unwrap(),
            Command::Sound(AmbientSound::Rain)
        );
        assert_eq!(
            "volume 0.3".parse::<Command>().unwrap(),
            Command::Volume(0.3)
        );
        assert!("sound".parse::<Command>().is_err());
        assert!("volume loud".parse::<Command>().is_err());
    }

    #[test]
    fn plan_takes_multi_word_titles() {
        assert_eq!(
            "plan Write chapter two 45".parse::<Command>().unwrap(),
            Command::Plan {
                title: "Write chapter two".into(),
                minutes: 45,
            }
        );
        assert!("plan 45".parse::<Command>().is_err());
        assert!("plan title soon".parse::<Command>().is_err());
    }

    #[test]
    fn stats_reports_week_and_lifetime() {
        use crate::{db::InMemoryRepository, models::Session};
        use chrono::TimeZone;

        fn completed(at: DateTime<Utc>, seconds: u64) -> Session {
            let mut session = Session::begin(at);
            session.elapsed_seconds = seconds;
            session.complete(at + ChronoDuration::seconds(seconds as i64));
            session
        }

        let monday = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let mut task = Task::new("Thesis", monday, monday + ChronoDuration::hours(2));
        task.sessions.push(completed(monday - ChronoDuration::days(7), 3600));
        task.sessions.push(completed(monday, 5400));
        task.sessions.push(completed(monday + ChronoDuration::days(2), 1800));
        let repo = InMemoryRepository::new();
        repo.insert_task(&task).unwrap();

        let thursday = monday + ChronoDuration::days(3);
        let utc = FixedOffset::east_opt(0).unwrap();
        let report = focus_report(&repo, thursday, utc).unwrap();

        assert_eq!(
            report,
            "week of 2025-01-06: 2h (lifetime 3h)\n  Mon 1h 30m | Tue - | Wed 30m | Thu - | Fri - | Sat - | Sun -"
        );
        assert_eq!("stats".parse::<Command>().unwrap(), Command::Stats);
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!("dance".parse::<Command>().is_err());
        assert!("".parse::<Command>().is_err());
    }
}
