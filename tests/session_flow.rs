mod common;

use std::collections::HashSet;

use common::{Participant, profile, run_to_end, set_records};
use trialseq::data::{Category, DataRow, FamiliarSource, RatingRecord, SetKey, Side};
use trialseq::{
    DeterministicRng, EngineConfig, EngineError, InMemoryResponseStore, ResponseStore, RunParams,
    Session, StepKind,
};

const IN_GROUP: &str = "Male-asian-young_adult-neutral";
const OUT_GROUP: &str = "Female-black-adult-neutral";

fn face_manifest() -> Vec<trialseq::StimulusRecord> {
    let mut manifest = set_records(Category::Face, IN_GROUP, 40);
    manifest.extend(set_records(Category::Face, OUT_GROUP, 40));
    manifest
}

fn ratings_for<'a>(rows: &'a [DataRow], set_id: &str) -> Vec<&'a RatingRecord> {
    rows.iter()
        .filter_map(DataRow::as_rating)
        .filter(|row| row.set_id == set_id)
        .collect()
}

#[test]
fn in_group_first_and_each_set_yields_19_ratings_and_18_preferences() {
    let mut session = Session::in_memory(
        EngineConfig::default(),
        RunParams::from_query("PROLIFIC_PID=p-001&cc=DONE42"),
        face_manifest(),
        Vec::new(),
    )
    .expect("session");
    let mut participant = Participant::new(profile("male", "asian", 30));
    let seen = run_to_end(&mut session, &mut participant).expect("run");

    let intros: Vec<&str> = seen
        .iter()
        .filter(|step| step.kind == StepKind::SetIntro)
        .filter_map(|step| step.set.as_ref().map(|set| set.set_id.as_str()))
        .collect();
    assert_eq!(intros, vec![IN_GROUP, OUT_GROUP]);

    let rows = session.store().rows();
    for set_id in [IN_GROUP, OUT_GROUP] {
        let ratings = ratings_for(rows, set_id);
        assert_eq!(ratings.len(), 19, "ratings for {set_id}");
        let rated: HashSet<&str> = ratings.iter().map(|r| r.stimulus_src.as_str()).collect();

        let preferences: Vec<_> = rows
            .iter()
            .filter_map(DataRow::as_preference)
            .filter(|row| row.set_id == set_id)
            .collect();
        assert_eq!(preferences.len(), 18, "preferences for {set_id}");
        for preference in &preferences {
            assert!(rated.contains(preference.familiar_src.as_str()));
            assert!(!rated.contains(preference.novel_src.as_str()));
            assert_eq!(preference.preference, -2);
        }
        let familiars: HashSet<&str> = preferences
            .iter()
            .map(|row| row.familiar_src.as_str())
            .collect();
        assert_eq!(familiars.len(), 1);
        assert_eq!(
            session
                .familiar_outcome(Category::Face, set_id)
                .map(|outcome| outcome.source),
            Some(FamiliarSource::Ratings)
        );
    }

    assert!(session.is_finished());
    assert_eq!(
        session.completion_url().as_deref(),
        Some("https://app.prolific.com/submissions/complete?cc=DONE42")
    );
    let payload = session.payload().expect("payload");
    assert_eq!(payload.prolific_pid.as_deref(), Some("p-001"));
    assert_eq!(payload.rows().expect("rows").len(), rows.len());
}

#[test]
fn every_rating_is_committed_before_familiar_computation() {
    let mut session = Session::in_memory(
        EngineConfig::default(),
        RunParams::default(),
        set_records(Category::Geometry, "Simple-symmetric", 37),
        Vec::new(),
    )
    .expect("session");
    run_to_end(&mut session, &mut Participant::new(profile("female", "white", 52)))
        .expect("run");
    let kinds: Vec<&str> = session
        .store()
        .rows()
        .iter()
        .map(DataRow::trial_type)
        .collect();
    let familiar_at = kinds
        .iter()
        .position(|kind| *kind == "compute_familiar")
        .expect("familiar row");
    let last_rating = kinds
        .iter()
        .rposition(|kind| *kind == "rating")
        .expect("rating rows");
    let first_preference = kinds
        .iter()
        .position(|kind| *kind == "preference")
        .expect("preference rows");
    assert!(last_rating < familiar_at);
    assert!(familiar_at < first_preference);
}

#[test]
fn preference_rows_record_sides_consistently() {
    let mut session = Session::in_memory(
        EngineConfig::default(),
        RunParams::default(),
        face_manifest(),
        Vec::new(),
    )
    .expect("session");
    run_to_end(&mut session, &mut Participant::new(profile("male", "asian", 30))).expect("run");

    let mut sides = HashSet::new();
    for row in session.store().rows().iter().filter_map(DataRow::as_preference) {
        assert_ne!(row.familiar_side, row.novel_side);
        if row.familiar_on_left {
            assert_eq!(row.familiar_side, Side::Left);
            assert_eq!(row.left_src, row.familiar_src);
            assert_eq!(row.right_src, row.novel_src);
        } else {
            assert_eq!(row.familiar_side, Side::Right);
            assert_eq!(row.right_src, row.familiar_src);
            assert_eq!(row.left_src, row.novel_src);
        }
        sides.insert(row.familiar_on_left);
    }
    assert_eq!(sides.len(), 2, "both placements should occur across 36 trials");
}

#[test]
fn same_participant_replays_the_same_order() {
    let order = || {
        let mut session = Session::in_memory(
            EngineConfig::default(),
            RunParams::from_query("PROLIFIC_PID=replay"),
            face_manifest(),
            Vec::new(),
        )
        .expect("session");
        run_to_end(&mut session, &mut Participant::new(profile("male", "asian", 30)))
            .expect("run");
        session
            .store()
            .rows()
            .iter()
            .filter_map(|row| match row {
                DataRow::Rating(rating) => Some(rating.stimulus_src.clone()),
                DataRow::Preference(preference) => Some(preference.left_src.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(order(), order());
}

#[test]
fn only_set_filter_limits_the_run_to_one_set() {
    let mut session = Session::in_memory(
        EngineConfig::default(),
        RunParams::from_query("only_set=female-BLACK-adult-neutral"),
        face_manifest(),
        Vec::new(),
    )
    .expect("session");
    run_to_end(&mut session, &mut Participant::new(profile("male", "asian", 30))).expect("run");
    let rows = session.store().rows();
    assert!(ratings_for(rows, IN_GROUP).is_empty());
    assert_eq!(ratings_for(rows, OUT_GROUP).len(), 19);
}

#[test]
fn questionnaires_follow_the_sets_and_precede_the_outro() {
    let questionnaires = vec![
        trialseq::QuestionnaireBlock::new("AQ-50", serde_json::json!({"items": 50})),
        trialseq::QuestionnaireBlock::new("debrief", serde_json::Value::Null),
    ];
    let mut session = Session::in_memory(
        EngineConfig::default(),
        RunParams::default(),
        set_records(Category::NaturalScene, "coast", 40),
        questionnaires,
    )
    .expect("session");
    let seen = run_to_end(&mut session, &mut Participant::new(profile("female", "latino", 25)))
        .expect("run");
    let tail: Vec<StepKind> = seen.iter().rev().take(3).map(|step| step.kind).collect();
    assert_eq!(
        tail,
        vec![StepKind::Outro, StepKind::Questionnaire, StepKind::Questionnaire]
    );
}

/// Store whose rating queries always fail, forcing the cache path.
#[derive(Default)]
struct QueryFailingStore {
    inner: InMemoryResponseStore,
}

impl ResponseStore for QueryFailingStore {
    fn append(&mut self, row: DataRow) -> Result<(), EngineError> {
        self.inner.append(row)
    }

    fn ratings_for(&self, _key: &SetKey) -> Result<Vec<RatingRecord>, EngineError> {
        Err(EngineError::StoreUnavailable {
            reason: "query endpoint offline".into(),
        })
    }

    fn rows(&self) -> &[DataRow] {
        self.inner.rows()
    }
}

#[test]
fn familiar_comes_from_cache_when_store_cannot_be_queried() {
    let mut session = Session::new(
        EngineConfig::default(),
        RunParams::default(),
        set_records(Category::Geometry, "circles", 40),
        Vec::new(),
        DeterministicRng::new(5),
        QueryFailingStore::default(),
    )
    .expect("session");
    run_to_end(&mut session, &mut Participant::new(profile("male", "white", 33))).expect("run");

    assert_eq!(
        session
            .cache()
            .len_for(&SetKey::new(Category::Geometry, "circles")),
        19
    );
    let rows = session.store().rows();
    let familiar = rows
        .iter()
        .find_map(|row| match row {
            DataRow::ComputeFamiliar(record) => Some(record),
            _ => None,
        })
        .expect("compute_familiar row");
    assert_eq!(familiar.rating_count, 0);
    assert_eq!(familiar.cache_count, 19);
    assert_eq!(rows.iter().filter_map(DataRow::as_preference).count(), 18);
}
