fn main() {
    focusjournal_lib::run()
}
