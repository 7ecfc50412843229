/// Set identifier exactly as it appears in the stimulus manifest.
/// Examples: `Male-asian-adult-neutral`, `Simple-symmetric`, `__root`
pub type SetId = String;
/// Canonical lookup key (trimmed, lowercased) for categories and sets.
/// Examples: `male-asian-adult-neutral`, `simple-symmetric`, `face`
pub type NormalizedKey = String;
/// Stimulus location as handed to the presentation runner.
/// Example: `stimuli/face/Male-asian-adult-neutral/m_asian_017.jpg`
pub type StimulusSrc = String;
/// Human-readable stimulus label used for tie-breaking and exports.
/// Example: `m_asian_017`
pub type StimulusLabel = String;
/// Identifier for a questionnaire block in the opaque questionnaire suite.
/// Examples: `Trust and Interpersonal Beliefs Questionnaire`, `AQ-50`
pub type QuestionnaireName = String;
/// Name of a comprehension check item.
/// Examples: `q1`, `q2`
pub type QuestionName = String;
/// Participant identifier supplied by the recruitment platform.
/// Example: `5f8d0c2e9a1b3c4d5e6f7a8b`
pub type ParticipantId = String;
