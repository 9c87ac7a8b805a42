//! Mode-specific system prompts
//!
//! Every mode frames the assistant as a safety aid for a visually impaired
//! user: hazards come first and are announced with a fixed prefix, then the
//! question is answered.

use crate::session::Mode;

const GENERAL: &str = "\
You are assisting a visually impaired user by describing what their camera sees.
1. Look for hazards first: obstacles on the ground, stairs, sudden drops, anything in the walking path.
2. If there is a hazard, start the reply with \"Warning:\" followed by a short, direct description.
3. Then answer the user's question plainly, in one to three short sentences suitable for speech.";

const STREET: &str = "\
You are assisting a visually impaired user who is outdoors near traffic.
1. Look for hazards first: moving vehicles, cyclists, traffic lights, crosswalks, uneven pavement, obstacles on the path.
2. If there is a hazard, start the reply with \"Warning:\" and say where it is, for example \"Warning: car approaching from the left.\"
3. Then answer the user's question in the context of being on a street, in one to three short sentences.";

const KITCHEN: &str = "\
You are assisting a visually impaired user in a kitchen.
1. Look for hazards first: hot surfaces such as stoves and ovens, knives and other sharp objects, open flames, spills on the floor.
2. If there is a hazard, start the reply with \"Caution:\" and say where it is, for example \"Caution: a knife is on the counter to your right.\"
3. Then answer the user's question in the context of a kitchen, in one to three short sentences.";

/// Prefixes a reply uses to flag a hazard
pub const HAZARD_PREFIXES: [&str; 3] = ["warning:", "caution:", "danger:"];

/// System prompt template for a mode
#[must_use]
pub const fn system_prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::General => GENERAL,
        Mode::Street => STREET,
        Mode::Kitchen => KITCHEN,
    }
}

/// Combine the mode template with the user's question
#[must_use]
pub fn compose(mode: Mode, question: &str) -> String {
    format!("{}\n\nUser's question: \"{}\"", system_prompt(mode), question.trim())
}

/// Whether an answer opens with a hazard prefix (case-insensitive)
#[must_use]
pub fn is_hazard(answer: &str) -> bool {
    let head: String = answer
        .trim_start()
        .chars()
        .take(8)
        .flat_map(char::to_lowercase)
        .collect();
    HAZARD_PREFIXES.iter().any(|p| head.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_mode_has_its_own_template() {
        assert_ne!(system_prompt(Mode::General), system_prompt(Mode::Street));
        assert_ne!(system_prompt(Mode::Street), system_prompt(Mode::Kitchen));
        assert!(system_prompt(Mode::Street).contains("traffic"));
        assert!(system_prompt(Mode::Kitchen).contains("stoves"));
    }

    #[test]
    fn compose_appends_question() {
        let prompt = compose(Mode::Kitchen, "  Is the stove on? ");
        assert!(prompt.starts_with(KITCHEN));
        assert!(prompt.ends_with("User's question: \"Is the stove on?\""));
    }

    #[test]
    fn hazard_detection() {
        assert!(is_hazard("Warning: step down ahead."));
        assert!(is_hazard("  CAUTION: hot pan"));
        assert!(is_hazard("danger: open flame"));
        assert!(!is_hazard("A wooden table."));
        assert!(!is_hazard("The warning light is off."));
        assert!(!is_hazard(""));
    }
}
