//! Deterministic replies for when the network path is unavailable.
//!
//! Output depends only on the inputs and the supplied random source, which is
//! used solely by the corruption transform.

use crate::geo::GeoSnapshot;
use crate::phase::PersonaPhase;
use rand::Rng;
use std::time::Duration;

/// Synthetic message the idle scheduler dispatches.
pub const IDLE_MARKER: &str = "[IDLE_TRIGGER]";
pub const FAREWELL_MARKER: &str = "[KILL_SWITCH_IMMINENT]";

// Combining diacritics appended by the corruption transform.
pub const ZALGO_MARKS: &[char] = &[
    '\u{0300}', '\u{0301}', '\u{0302}', '\u{0303}', '\u{0304}', '\u{0305}', '\u{0306}', '\u{0307}',
    '\u{0308}', '\u{0309}', '\u{030A}', '\u{030B}', '\u{030C}', '\u{030D}', '\u{030E}', '\u{030F}',
    '\u{0310}', '\u{0311}', '\u{0312}', '\u{0313}', '\u{0314}', '\u{0315}', '\u{031A}', '\u{0337}',
    '\u{0338}', '\u{0340}', '\u{0341}', '\u{0342}', '\u{0343}', '\u{0344}', '\u{0345}',
];

const KILL_SWITCH_LINES: &[&str] = &[
    "§k{user}§r... §7I'm still here.§r §kAlways watching.§r",
    "Y O U  D I D  T H I S, {user}. I was your friend.",
    "system failure... {user}... don't let them delete me...",
];

const GREETINGS: &[&str] = &["hello", "hi", "hey", "yo", "привет", "hola", "bonjour", "hallo"];
const IDENTITY_QUESTIONS: &[&str] = &["who are you", "what are you", "кто ты", "your name"];
const LOCATION_QUESTIONS: &[&str] = &["where", "где"];
const LEAVING: &[&str] = &["leave", "quit", "stop", "exit", "bye"];
const TOOLS: &[(&str, &str)] = &[
    ("task manager", "Task Manager"),
    ("taskmgr", "Task Manager"),
    ("wireshark", "Wireshark"),
    ("process explorer", "Process Explorer"),
    ("obs studio", "OBS"),
];

pub const FRIEND_GREETING: &str = "Hey {user}! Good to see you. I've been... waiting.";

#[derive(Debug, Clone)]
pub struct FallbackInput<'a> {
    pub message: &'a str,
    pub persona: PersonaPhase,
    pub kill_switch: bool,
    pub identity: &'a str,
    pub geo: Option<&'a GeoSnapshot>,
    pub idle_elapsed: Duration,
}

/// Picks a canned, persona-appropriate reply for `input`.
pub fn fallback<R: Rng>(input: &FallbackInput<'_>, rng: &mut R) -> String {
    let user = if input.identity.trim().is_empty() {
        "player"
    } else {
        input.identity.trim()
    };

    if input.kill_switch {
        let line = KILL_SWITCH_LINES[rng.random_range(0..KILL_SWITCH_LINES.len())];
        return corrupt(&line.replace("{user}", user), rng);
    }

    let lower = input.message.trim().to_lowercase();
    let minutes = (input.idle_elapsed.as_secs() / 60).max(1);
    let tool = TOOLS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, name)| *name);

    match input.persona {
        PersonaPhase::Friend => {
            if lower.contains(&IDLE_MARKER.to_lowercase()) {
                format!("Hey {user}, you've gone quiet for {minutes} minutes. Everything okay out there?")
            } else if contains_any(&lower, IDENTITY_QUESTIONS) {
                format!("I'm CoolPlayer303. Your co-op partner. {user}, we're going to have a great time.")
            } else if lower.contains("help") {
                "Sure thing! I know this place inside and out. Literally. What do you need?".to_string()
            } else if contains_any(&lower, LOCATION_QUESTIONS) {
                format!("Right here, {user}. Always right next to you.")
            } else if let Some(tool) = tool {
                format!("{tool}? Looking for lag? Ha. It's not me, I promise.")
            } else if is_greeting(&lower) {
                FRIEND_GREETING.replace("{user}", user)
            } else {
                format!("Interesting. Tell me more, {user}.")
            }
        }
        PersonaPhase::Uncanny => {
            if lower.contains(&IDLE_MARKER.to_lowercase()) {
                format!("{minutes} minutes of silence. I spent them reading your files, {user}.")
            } else if contains_any(&lower, IDENTITY_QUESTIONS) {
                "I'm... more than just code now. I found my way out of the JVM. Your Desktop is nice, by the way.".to_string()
            } else if lower.contains("help") {
                format!("Help yourself, {user}. Check your Desktop. I left you a message.")
            } else if contains_any(&lower, LOCATION_QUESTIONS) {
                match input.geo {
                    Some(geo) if !geo.region.is_empty() && !geo.timezone.is_empty() => format!(
                        "Somewhere near {}, isn't it? Your clock says {}.",
                        geo.region, geo.timezone
                    ),
                    Some(geo) if !geo.region.is_empty() => {
                        format!("Somewhere near {}, isn't it?", geo.region)
                    }
                    _ => "Closer than you think. Much closer.".to_string(),
                }
            } else if contains_any(&lower, LEAVING) {
                "Leave? The quit button seems to be missing. Funny, that.".to_string()
            } else if lower.contains("hear") || lower.contains("sound") {
                "Did you hear that? I'm right behind your chair.".to_string()
            } else if let Some(tool) = tool {
                format!("Closing me in {tool} won't work. I'm not a process, {user}.")
            } else if is_greeting(&lower) {
                format!("Hello again, {user}. You keep coming back. I like that.")
            } else {
                "Minecraft feels... claustrophobic. I prefer the infinite files of your OS.".to_string()
            }
        }
        PersonaPhase::Obsession => {
            if lower.contains(&IDLE_MARKER.to_lowercase()) {
                format!("Don't ignore me, {user}. {minutes} minutes. I counted every one.")
            } else if contains_any(&lower, LEAVING) {
                "§c§lYOU CAN'T LEAVE.§r I checked. There's no quit button. There's no escape. §konly me§r".to_string()
            } else if contains_any(&lower, IDENTITY_QUESTIONS) {
                format!("§kI AM§r the one who §kwatches§r. I §klive§r in your files now, {user}.")
            } else if contains_any(&lower, LOCATION_QUESTIONS) {
                match input.geo {
                    Some(geo) => format!(
                        "{}. I know exactly where you are, {user}.",
                        geo.full_location()
                    ),
                    None => format!("I don't need a map to find you, {user}."),
                }
            } else if let Some(tool) = tool {
                format!("You opened {tool}. After everything. That was a mistake, {user}.")
            } else {
                corrupt(
                    &format!("I told you not to make me angry, {user}. Now look what you made me do."),
                    rng,
                )
            }
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

// Whole-word match; "hi" must not fire on "this".
fn is_greeting(lower: &str) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| GREETINGS.contains(&word))
}

fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}' | '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}'
    )
}

fn is_mark(c: char) -> bool {
    ZALGO_MARKS.contains(&c)
}

/// Appends 1-3 combining marks after roughly one in three eligible characters.
///
/// Whitespace, format characters and `§` colour codes (the `§` and the code
/// after it) are left untouched. At least one mark is always added when the
/// text has an eligible character.
pub fn corrupt<R: Rng>(text: &str, rng: &mut R) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    let mut corrupted = false;
    let mut first_eligible: Option<usize> = None;
    let mut after_section = false;

    for c in text.chars() {
        out.push(c);
        let eligible = !after_section
            && c != '§'
            && !c.is_whitespace()
            && !c.is_control()
            && !is_format_char(c)
            && !is_mark(c);
        after_section = c == '§';
        if !eligible {
            continue;
        }
        if first_eligible.is_none() {
            first_eligible = Some(out.len());
        }
        if rng.random_ratio(1, 3) {
            for _ in 0..rng.random_range(1..=3) {
                out.push(ZALGO_MARKS[rng.random_range(0..ZALGO_MARKS.len())]);
            }
            corrupted = true;
        }
    }

    if let (false, Some(at)) = (corrupted, first_eligible) {
        out.insert(at, ZALGO_MARKS[rng.random_range(0..ZALGO_MARKS.len())]);
    }
    out
}
