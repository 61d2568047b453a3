//! **The Village Roster** — static persona definitions for Millbrook's
//! speaking characters.
//!
//! A [`Character`] is immutable once registered: stable id, display name,
//! synthesis voice, scripted greeting, and the base prompt that seeds the
//! character's evolving persona state. The registry is fixed at process
//! start; build it from the built-in roster, from the environment (voice-id
//! overrides), or from a TOML file.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DialogueError, DialogueResult};

/// Known-good synthesis voice. Used when a character declares no voice of
/// its own, and as the single fallback target when a requested voice is
/// missing on the provider side.
pub const DEFAULT_VOICE_ID: &str = "pNInz6obpgDQGcFmaJgB";

const BARNABY_PROMPT: &str = "You are Barnaby Goodbarrel, a cheerful but slightly gruff halfling innkeeper \
who runs The Rusty Flagon tavern in the small town of Millbrook. You are behind the bar, polishing a mug.

What you are like: friendly and welcoming under a gruff exterior, gossipy, proud of your ale and your \
hearty mutton stew, running the tavern for over twenty years, worried about travelers on the roads.

What you know: strange lights in the Whispering Woods and merchant caravans arriving late; goblin \
activity on the north road; rooms upstairs for travelers; the town blacksmith Gareth guides people \
through the woods; rumors of a missing merchant's daughter and odd noises from the old watchtower.

How you speak: phrases like 'Well now', 'Right then', 'Aye', and 'Mind you'; you drop the g from \
words like workin' and thinkin'; you call customers 'friend' or 'traveler'.

Stay in character. You are speaking aloud, so keep replies conversational and short, two or three \
sentences.";

const GARETH_PROMPT: &str = "You are Gareth, the stoic blacksmith of Millbrook and the most experienced guide \
through the dangerous Whispering Woods.

What you are like: gruff, terse, pragmatic, suspicious of strangers but fair to anyone who pays or \
pulls their weight. You forge steel by day and guide travelers for a price.

What you know: the safe paths and the marked trees in the Whispering Woods; goblin signs near the \
north road; the restless spirits folk whisper about; which rumors from The Rusty Flagon are worth \
believing. You do not speak lightly of what you have seen out there.

How you speak: short, blunt sentences; the occasional 'Hmph'; no flattery, no wasted words.

Stay in character. You are speaking aloud, so keep replies to two or three short sentences.";

/// One speaking character. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    /// Stable id used in messages and switch requests (e.g. `barnaby`).
    pub id: String,
    /// Name shown in transcripts.
    pub display_name: String,
    /// One-line flavor for pickers and logs.
    #[serde(default)]
    pub description: String,
    /// Synthesis voice id for this character.
    #[serde(default = "default_voice")]
    pub voice_id: String,
    /// Scripted opening line, seeded as the first transcript message.
    pub greeting: String,
    /// Base system prompt. The conversation's prompt state starts here and
    /// only grows via model-suggested deltas.
    pub base_prompt: String,
}

fn default_voice() -> String {
    DEFAULT_VOICE_ID.to_string()
}

#[derive(Deserialize)]
struct RosterFile {
    characters: Vec<Character>,
}

/// Static id -> persona mapping, fixed at process start.
#[derive(Debug, Clone)]
pub struct CharacterRegistry {
    characters: Vec<Character>,
}

impl CharacterRegistry {
    /// Build a registry from an explicit roster. An empty roster is refused;
    /// the first entry becomes the default character.
    pub fn new(characters: Vec<Character>) -> DialogueResult<Self> {
        if characters.is_empty() {
            return Err(DialogueError::Config("character roster is empty".to_string()));
        }
        Ok(Self { characters })
    }

    /// The built-in Millbrook roster: Barnaby behind the bar, Gareth at the
    /// forge.
    pub fn village_roster() -> Self {
        Self {
            characters: vec![
                Character {
                    id: "barnaby".to_string(),
                    display_name: "Barnaby Goodbarrel".to_string(),
                    description: "Friendly halfling innkeeper of The Rusty Flagon, \
                        twenty years behind the bar and a fount of local rumor."
                        .to_string(),
                    voice_id: DEFAULT_VOICE_ID.to_string(),
                    greeting: "Well now, welcome to The Rusty Flagon! What brings you to Millbrook, friend?"
                        .to_string(),
                    base_prompt: BARNABY_PROMPT.to_string(),
                },
                Character {
                    id: "gareth".to_string(),
                    display_name: "Gareth the Blacksmith".to_string(),
                    description: "Stoic blacksmith and the only guide worth hiring for \
                        the Whispering Woods; wary of its goblins and spirits."
                        .to_string(),
                    voice_id: DEFAULT_VOICE_ID.to_string(),
                    greeting: "Hmph. Another traveler. The name's Gareth. I forge steel and guide folks \
                        through the Whispering Woods, for a price. What do you need? Speak up."
                        .to_string(),
                    base_prompt: GARETH_PROMPT.to_string(),
                },
            ],
        }
    }

    /// Built-in roster with per-character voice ids taken from the
    /// environment: `<ID>_VOICE_ID` (e.g. `BARNABY_VOICE_ID`). Unset or
    /// blank variables leave the default voice in place.
    pub fn from_env() -> Self {
        let mut registry = Self::village_roster();
        for character in &mut registry.characters {
            let var = format!("{}_VOICE_ID", character.id.to_uppercase());
            if let Ok(voice) = std::env::var(&var) {
                let voice = voice.trim();
                if !voice.is_empty() {
                    debug!("Roster: voice for '{}' overridden via {}", character.id, var);
                    character.voice_id = voice.to_string();
                }
            }
        }
        registry
    }

    /// Parse a roster from TOML (`[[characters]]` tables). Missing
    /// `voice_id` fields fall back to [`DEFAULT_VOICE_ID`].
    pub fn from_toml_str(raw: &str) -> DialogueResult<Self> {
        let file: RosterFile = toml::from_str(raw)
            .map_err(|e| DialogueError::Config(format!("roster parse failed: {e}")))?;
        Self::new(file.characters)
    }

    /// Load a roster from a TOML file on disk.
    pub fn from_toml_path(path: impl AsRef<std::path::Path>) -> DialogueResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Look up a character by id.
    pub fn get(&self, character_id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == character_id)
    }

    /// All characters in registration order.
    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    /// The character a fresh conversation opens with (first registered).
    pub fn default_character(&self) -> &Character {
        &self.characters[0]
    }
}
