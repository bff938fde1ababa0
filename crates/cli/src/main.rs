use std::process::ExitCode;

fn main() -> ExitCode {
    receiptpath_cli::run()
}
