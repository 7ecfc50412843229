use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    trialseq::example_apps::run_plan_preview(std::env::args().skip(1))
}
