use std::process::ExitCode;

fn main() -> ExitCode {
    // Optional `.env`; real environment variables take precedence.
    dotenvy::dotenv().ok();
    co2_forecast::app::init_tracing();

    match co2_forecast::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
