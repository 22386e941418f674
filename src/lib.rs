mod console;
pub mod db;
pub mod error;
pub mod events;
pub mod focus;
pub mod models;
pub mod presenter;
pub mod scheduler;
pub mod settings;
pub mod sound;
pub mod stats;
pub mod timer;
mod utils;

use std::rc::Rc;

use chrono::FixedOffset;

use db::FocusRepository;
use focus::SessionAccountant;
use presenter::FocusPresenter;
use scheduler::{Clock, Scheduler};
use settings::EngineConfig;
use sound::{CrossfadeScheduler, PlayerFactory};
use timer::ClockTimer;

pub use error::{FocusError, FocusResult};

/// The engine wired together: one timer, one sound scheduler, one accountant
/// and a presenter over them. Every collaborator is passed in.
pub struct FocusApp {
    pub accountant: SessionAccountant,
    pub presenter: FocusPresenter,
}

impl FocusApp {
    pub fn new(
        repo: Rc<dyn FocusRepository>,
        clock: Rc<dyn Clock>,
        scheduler: Rc<dyn Scheduler>,
        players: Rc<dyn PlayerFactory>,
        config: EngineConfig,
        offset: FixedOffset,
    ) -> Self {
        let timer = ClockTimer::new(clock.clone(), scheduler.clone(), config.tick_interval);
        let sound = CrossfadeScheduler::new(players, scheduler, config.crossfade);
        let accountant = SessionAccountant::new(repo, clock, timer, sound, config);
        let presenter = FocusPresenter::new(accountant.clone(), offset);

        Self {
            accountant,
            presenter,
        }
    }
}

pub fn run() {
    // RUST_LOG wins; info otherwise.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Focus journal starting up...");

    if let Err(err) = run_console() {
        log::error!("Focus journal stopped: {err:#}");
        std::process::exit(1);
    }
}

fn run_console() -> anyhow::Result<()> {
    let data_dir = settings::resolve_data_dir(std::env::args().nth(1));
    std::fs::create_dir_all(&data_dir)?;
    log::info!("Using data directory {}", data_dir.display());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, console::run(data_dir))
}
