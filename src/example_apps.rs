use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, error::ErrorKind};

use crate::config::{EngineConfig, ProfileFallback, RunParams};
use crate::data::{Category, DataRow, ParticipantProfile};
use crate::gate::correct_answers;
use crate::index::StimulusIndex;
use crate::manifest::load_manifest_path;
use crate::plan::PlanBuilder;
use crate::questionnaire::{QuestionnaireBlock, load_questionnaires_path};
use crate::rng::DeterministicRng;
use crate::session::Session;
use crate::step::{Presentation, Response, ResponseConstraint, StepKind};
use crate::store::ResponseStore;

#[derive(Debug, Parser)]
#[command(
    name = "plan_preview",
    disable_help_subcommand = true,
    about = "Print the plan a participant profile would receive",
    long_about = "Load a stimulus manifest, derive the in-group face set from the given profile, and print the ordered set list with per-set stimulus counts."
)]
struct PlanPreviewCli {
    #[arg(long, value_name = "PATH", help = "Stimulus manifest JSON file")]
    manifest: PathBuf,
    #[arg(long, default_value_t = 42, help = "Deterministic seed for plan order")]
    seed: u64,
    #[arg(long, help = "Participant id mixed into the seed")]
    participant: Option<String>,
    #[arg(long, help = "Gender at birth (male/female)")]
    gender: Option<String>,
    #[arg(long, help = "Self-reported race (asian/black/latino/white)")]
    race: Option<String>,
    #[arg(long, help = "Age in years")]
    age: Option<u32>,
    #[arg(long = "age-range", help = "Age bracket, used when --age is absent")]
    age_range: Option<String>,
    #[arg(
        long,
        help = "Leave the in-group unresolved instead of sampling missing profile fields"
    )]
    strict: bool,
    #[arg(
        long,
        default_value = "",
        help = "Run-scoping query string (only_category, only_set, ...)"
    )]
    query: String,
}

#[derive(Debug, Parser)]
#[command(
    name = "simulated_session",
    disable_help_subcommand = true,
    about = "Drive a full session with synthetic responses",
    long_about = "Run every step of a session from demographics to outro, answering each with a synthetic response, then print per-set record counts."
)]
struct SimulatedSessionCli {
    #[arg(long, value_name = "PATH", help = "Stimulus manifest JSON file")]
    manifest: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        help = "Optional questionnaire suite JSON file"
    )]
    questionnaires: Option<PathBuf>,
    #[arg(long, default_value_t = 42, help = "Deterministic seed")]
    seed: u64,
    #[arg(
        long,
        default_value = "PROLIFIC_PID=demo",
        help = "Run-scoping query string"
    )]
    query: String,
    #[arg(long, default_value = "male", help = "Gender at birth reported by the simulated participant")]
    gender: String,
    #[arg(long, default_value = "asian", help = "Race reported by the simulated participant")]
    race: String,
    #[arg(long, default_value_t = 30, help = "Age reported by the simulated participant")]
    age: u32,
    #[arg(
        long = "fail-comprehension",
        default_value_t = 0,
        help = "Number of wrong comprehension attempts before the correct one"
    )]
    fail_comprehension: u32,
    #[arg(long = "emit-json", help = "Print the submission payload as JSON")]
    emit_json: bool,
}

/// Print the plan for a profile without running a session.
pub fn run_plan_preview<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) =
        parse_cli::<PlanPreviewCli, _>(std::iter::once("plan_preview".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };

    let manifest = load_manifest_path(&cli.manifest)?;
    let index = StimulusIndex::build(&manifest);
    if index.is_empty() {
        eprintln!("Manifest {} holds no usable stimuli.", cli.manifest.display());
        return Ok(());
    }

    let mut config = EngineConfig {
        seed: cli.seed,
        ..EngineConfig::default()
    };
    if cli.strict {
        config.plan.profile_fallback = ProfileFallback::Strict;
    }
    let params = RunParams::from_query(&cli.query);
    let profile = ParticipantProfile {
        age: cli.age,
        age_range: cli.age_range,
        gender_birth: cli.gender,
        race: cli.race,
    };
    let mut rng = match cli.participant.as_deref() {
        Some(pid) => DeterministicRng::for_participant(config.seed, pid),
        None => DeterministicRng::new(config.seed),
    };

    let plan = PlanBuilder::new(&index, config.plan.clone())
        .build(&profile, &mut rng)
        .apply_scope(&params);
    let min_size = config.sequencer.min_set_size();

    println!("=== plan ===");
    println!(
        "category order: {}",
        plan.category_order
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    println!(
        "in-group set: {}",
        plan.in_group.as_deref().unwrap_or("<unresolved>")
    );
    if plan.blocks.is_empty() {
        println!("No sets matched the current filters.");
        return Ok(());
    }
    for (idx, block) in plan.blocks.iter().enumerate() {
        let available = block.stimuli().len();
        let status = if available >= min_size {
            "ok".to_string()
        } else {
            format!("too small (needs {min_size})")
        };
        println!(
            "{:>2}. {:<14} {:<40} {:>4} images  {}",
            idx + 1,
            block.category.as_str(),
            block.set_id,
            available,
            status
        );
    }
    Ok(())
}

/// Run a whole session with synthetic responses and summarize the rows.
pub fn run_simulated_session<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) = parse_cli::<SimulatedSessionCli, _>(
        std::iter::once("simulated_session".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let manifest = load_manifest_path(&cli.manifest)?;
    let questionnaires: Vec<QuestionnaireBlock> = match &cli.questionnaires {
        Some(path) => load_questionnaires_path(path)?,
        None => Vec::new(),
    };
    let config = EngineConfig {
        seed: cli.seed,
        ..EngineConfig::default()
    };
    let mut responder = SyntheticResponder {
        profile: ParticipantProfile {
            age: Some(cli.age),
            age_range: None,
            gender_birth: Some(cli.gender),
            race: Some(cli.race),
        },
        correct: correct_answers(&config.comprehension),
        wrong_attempts_left: cli.fail_comprehension,
        counter: 0,
    };
    let mut session = Session::in_memory(
        config,
        RunParams::from_query(&cli.query),
        manifest,
        questionnaires,
    )?;

    let mut presented = 0usize;
    while let Some(step) = session.present()? {
        let response = responder.respond(&step);
        session.finalize(response)?;
        presented += 1;
    }

    print_summary(session.store().rows(), presented);
    if let Some(url) = session.completion_url() {
        println!("completion url: {url}");
    }
    if cli.emit_json {
        println!("{}", session.payload()?.to_json()?);
    }
    Ok(())
}

struct SyntheticResponder {
    profile: ParticipantProfile,
    correct: Vec<(String, String)>,
    wrong_attempts_left: u32,
    counter: u64,
}

impl SyntheticResponder {
    fn respond(&mut self, step: &Presentation) -> Response {
        self.counter += 1;
        let rt = 300 + (self.counter * 37) % 900;
        let response = match &step.constraint {
            ResponseConstraint::Timed { .. } => Response::timeout(),
            ResponseConstraint::Key { .. } => Response::key(" "),
            ResponseConstraint::Slider { slider } => {
                let steps = ((slider.max - slider.min) / slider.step).round() as u64;
                let offset = (self.counter * 7) % (steps + 1);
                Response::slider(slider.min + offset as f64 * slider.step)
            }
            ResponseConstraint::Profile => Response::profile(self.profile.clone()),
            ResponseConstraint::Choice { names } => {
                if self.wrong_attempts_left > 0 {
                    self.wrong_attempts_left -= 1;
                    Response::choices(names.iter().map(|name| (name.clone(), "not sure")))
                } else {
                    Response::choices(self.correct.clone())
                }
            }
            ResponseConstraint::Survey => {
                Response::survey(serde_json::json!({ "completed": true }))
            }
        };
        if step.kind == StepKind::Preview || step.kind == StepKind::Fixation {
            response
        } else {
            response.with_rt(rt)
        }
    }
}

fn print_summary(rows: &[DataRow], presented: usize) {
    println!("=== session summary ===");
    println!("steps presented: {presented}");
    println!("rows stored: {}", rows.len());

    let mut per_set: indexmap::IndexMap<&str, (usize, usize)> = indexmap::IndexMap::new();
    let mut markers: indexmap::IndexMap<&'static str, usize> = indexmap::IndexMap::new();
    for row in rows {
        match row {
            DataRow::Rating(rating) => per_set.entry(&rating.set_id).or_default().0 += 1,
            DataRow::Preference(preference) => {
                per_set.entry(&preference.set_id).or_default().1 += 1
            }
            DataRow::ComputeFamiliarFallback(_)
            | DataRow::ComputeFamiliarFailed(_)
            | DataRow::FatalCategoryCount(_)
            | DataRow::PreferenceUnavailable(_)
            | DataRow::Comprehension(_) => *markers.entry(row.trial_type()).or_default() += 1,
            _ => {}
        }
    }
    for (set_id, (ratings, preferences)) in &per_set {
        println!("  {set_id:<40} ratings={ratings:<3} preferences={preferences}");
    }
    for (trial_type, count) in &markers {
        println!("  {trial_type}: {count}");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_file(count: usize) -> tempfile::NamedTempFile {
        let records: Vec<serde_json::Value> = (0..count)
            .map(|idx| {
                serde_json::json!({
                    "src": format!("stimuli/geometry/circles/{idx:03}.png"),
                    "category": "geometry",
                    "set": "circles"
                })
            })
            .collect();
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, "{}", serde_json::Value::Array(records)).expect("write");
        file
    }

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn help_flag_is_not_an_error() {
        assert!(run_plan_preview(args(&["--help"])).is_ok());
    }

    #[test]
    fn missing_manifest_flag_is_an_error() {
        assert!(run_simulated_session(args(&[])).is_err());
    }

    #[test]
    fn simulated_session_runs_to_completion() {
        let file = manifest_file(40);
        let path = file.path().to_string_lossy().to_string();
        assert!(
            run_simulated_session(args(&["--manifest", &path, "--fail-comprehension", "1"])).is_ok()
        );
        assert!(run_plan_preview(args(&["--manifest", &path, "--strict"])).is_ok());
    }

    #[test]
    fn synthetic_slider_values_stay_on_grid() {
        let mut responder = SyntheticResponder {
            profile: ParticipantProfile::default(),
            correct: Vec::new(),
            wrong_attempts_left: 0,
            counter: 0,
        };
        let slider = crate::step::SliderSpec::rating();
        let step = Presentation {
            kind: StepKind::Rating,
            set: None,
            content: crate::step::ScreenContent::Fixation,
            constraint: ResponseConstraint::Slider {
                slider: slider.clone(),
            },
            utc_start: chrono::Utc::now(),
        };
        for _ in 0..50 {
            let response = responder.respond(&step);
            let crate::step::ResponseValue::Slider { value, moved } = response.value else {
                panic!("expected slider");
            };
            assert!(slider.check(value, moved).is_ok());
        }
    }
}
