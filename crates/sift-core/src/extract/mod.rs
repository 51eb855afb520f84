//! L3 task extraction: a regex tier for rigid formats and a generative tier
//! for free text.

mod deterministic;
mod fallback;
mod generative;
mod json_parser;
mod prompts;

pub use deterministic::DeterministicExtractor;
pub use fallback::{guess_due_text, guess_summary};
pub use generative::{GenerativeExtractor, BUNDLED_GRAMMAR};
pub use json_parser::{extract_json_object, parse_model_output, strip_think_tags, ModelOutput};
pub use prompts::build_prompt;
