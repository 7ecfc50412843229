use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    trialseq::example_apps::run_simulated_session(std::env::args().skip(1))
}
