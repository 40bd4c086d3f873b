use std::process::ExitCode;

fn main() -> ExitCode {
    volley::entry::run()
}
