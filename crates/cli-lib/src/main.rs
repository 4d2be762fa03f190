pub fn main() {
    std::process::exit(quereus_cli::run_with_args(std::env::args_os()));
}
