//! Readable thread-name generation, adjective-noun style
//! (e.g. "cold-lamp", "brave-otter").

use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "able", "airy", "bold", "brisk", "calm", "clear", "cold", "cosy", "deep", "deft", "eager",
    "fair", "fast", "fine", "fond", "free", "glad", "gold", "good", "hazy", "keen", "kind", "late",
    "lean", "lone", "loud", "mild", "neat", "pale", "prime", "quick", "rare", "ripe", "safe",
    "sage", "slim", "snug", "soft", "solo", "spry", "still", "swift", "tall", "tidy", "trim",
    "true", "warm", "wise",
];

const NOUNS: &[&str] = &[
    "acorn", "aspen", "badger", "beacon", "birch", "brook", "cedar", "cliff", "comet", "coral",
    "crane", "delta", "dune", "ember", "falcon", "fern", "finch", "fjord", "flint", "gale",
    "glade", "grove", "harbor", "heron", "inlet", "knoll", "lagoon", "lark", "linden", "maple",
    "meadow", "mesa", "otter", "pebble", "pine", "prairie", "quartz", "raven", "reef", "ridge",
    "river", "slate", "sparrow", "spruce", "summit", "thicket", "tundra", "willow",
];

/// Generate a readable `adjective-noun` name.
pub fn generate_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{adjective}-{noun}")
}
