fn main() {
    if let Err(err) = riskreg::cli::run() {
        riskreg::ui::eprintln_error(&err);
        std::process::exit(riskreg::exit::exit_code(&err));
    }
}
