fn main() {
    if let Err(err) = setupwiz::cli::run() {
        setupwiz::ui::eprintln_error(&err);
        std::process::exit(setupwiz::exit::exit_code(&err));
    }
}
