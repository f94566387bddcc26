// ai
//! 🎭 SyntheticGenerator: a call center staffed entirely by templates.
//!
//! 🎬 *[five scripts. thirty-odd fill-in-the-blanks. a random number generator with a
//! flair for customer service. it has never been on hold in its life.]*
//!
//! Produces conversations shaped like the real dataset: alternating agent/customer
//! utterances, plausible timings, high-but-not-perfect confidence, and the domain/topic/
//! accent labels downstream dashboards like to group by. Seeded runs are reproducible,
//! which is the whole point for tests and for `feedloop generate --seed`.

use std::io::{BufWriter, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::info;

use crate::error::FeedError;
use crate::records::Utterance;

/// 🎛️ How big a call center to imagine.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SyntheticConfig {
    #[serde(default = "default_conversations")]
    pub conversations: usize,
    /// 🎲 fixed seed for reproducible output; `None` means "surprise me"
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_conversations() -> usize {
    1_000
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            conversations: default_conversations(),
            seed: None,
        }
    }
}

type Script = &'static [(&'static str, &'static str)];

const BILLING: Script = &[
    ("agent", "Thank you for calling billing support. How may I help you today?"),
    ("customer", "Hi, I'm calling about a charge on my recent bill that I don't recognize."),
    ("agent", "I understand your concern. Let me pull up your account. Can I have your account number please?"),
    ("customer", "Sure, it's {account_num}."),
    ("agent", "Thank you. I can see your account now. Let me review your recent charges."),
    ("agent", "I see the charge you're referring to. It's a {charge_type} fee from {date}."),
    ("customer", "Oh, I wasn't aware of that. Can you explain what it's for?"),
    ("agent", "Of course. This fee covers {service_description}."),
    ("customer", "I see. That makes sense now. Thank you for clarifying."),
    ("agent", "You're welcome. Is there anything else I can help you with today?"),
    ("customer", "No, that's all. Thank you for your help."),
    ("agent", "Thank you for calling. Have a great day!"),
];

const TECH_SUPPORT: Script = &[
    ("agent", "Hello, this is tech support. What seems to be the problem?"),
    ("customer", "My {device} keeps {problem} every few minutes."),
    ("agent", "I'm sorry to hear that. Let's troubleshoot this together."),
    ("agent", "Can you tell me what lights are showing on your {device}?"),
    ("customer", "The {indicator1} is solid green, but the {indicator2} is blinking red."),
    ("agent", "That indicates a {issue_type}. Let's try resetting your {device}."),
    ("customer", "Okay, I've unplugged it. How long should I wait?"),
    ("agent", "Wait about 30 seconds, then plug it back in."),
    ("customer", "Alright, it's plugged back in now. The lights are coming back on."),
    ("agent", "Great. Let's wait for all the lights to stabilize."),
    ("customer", "Okay, the {indicator2} is now solid green."),
    ("agent", "Perfect! Try {test_action} now."),
    ("customer", "Yes, it's working! Thank you so much!"),
    ("agent", "You're welcome. Call us if you have any more issues."),
];

const SALES: Script = &[
    ("agent", "Good {time_of_day}, I'm calling about our special promotion on {product}."),
    ("customer", "What kind of promotion is it?"),
    ("agent", "We're offering {discount}% off on our {tier} plan for the next {period}."),
    ("customer", "That sounds interesting. What does the {tier} plan include?"),
    ("agent", "It includes {feature1}, {feature2}, and {feature3}."),
    ("customer", "How much would it cost after the promotional period?"),
    ("agent", "After {period}, it would be ${price} per month."),
    ("customer", "That's a bit more than I'm paying now. Let me think about it."),
    ("agent", "I understand. Would you like me to email you the details?"),
    ("customer", "Yes, that would be helpful."),
    ("agent", "Great. I'll send that over shortly. Thank you for your time."),
];

const ACCOUNT_INQUIRY: Script = &[
    ("agent", "Thank you for calling customer service. How can I assist you?"),
    ("customer", "I need to {request_type} on my account."),
    ("agent", "I can help you with that. For security purposes, can you verify your {verification_field}?"),
    ("customer", "{verification_value}."),
    ("agent", "Thank you. I've pulled up your account. Let me {action} for you."),
    ("customer", "How long will this take?"),
    ("agent", "This should be completed within {timeframe}."),
    ("customer", "Okay, and will I receive a confirmation?"),
    ("agent", "Yes, you'll receive a confirmation {notification_method} within {time}."),
    ("customer", "Perfect. Is there anything else I need to do?"),
    ("agent", "No, that's all set. Is there anything else I can help you with?"),
    ("customer", "No, that's everything. Thank you!"),
    ("agent", "You're welcome. Have a wonderful day!"),
];

const COMPLAINT: Script = &[
    ("agent", "{greeting}, how can I help you today?"),
    ("customer", "I'm very frustrated with {issue}."),
    ("agent", "I sincerely apologize for the inconvenience. Let me see what I can do to resolve this."),
    ("customer", "I've been dealing with this for {duration}."),
    ("agent", "I understand your frustration. I'm going to {resolution_action} right now."),
    ("customer", "When will this be fixed?"),
    ("agent", "I've {action_completed}. It should be resolved within {timeframe}."),
    ("customer", "Okay, I hope so."),
    ("agent", "I'll also {compensation_offer} as an apology for the inconvenience."),
    ("customer", "Thank you, I appreciate that."),
    ("agent", "Is there anything else I can help you with?"),
    ("customer", "No, that's all."),
    ("agent", "Thank you for your patience. Have a great day."),
];

const SCRIPTS: &[Script] = &[BILLING, TECH_SUPPORT, SALES, ACCOUNT_INQUIRY, COMPLAINT];

/// 🧩 The blanks and what may go in them. Numeric blanks are rolled in `fill_blank`.
const BLANKS: &[(&str, &[&str])] = &[
    ("charge_type", &["service", "activation", "upgrade", "installation", "processing"]),
    ("date", &["last month", "this month", "two weeks ago", "the 15th"]),
    (
        "service_description",
        &[
            "the installation of your new service",
            "the monthly service fee",
            "the equipment rental",
            "the premium feature upgrade",
        ],
    ),
    ("device", &["modem", "router", "internet connection", "phone", "cable box"]),
    ("problem", &["disconnecting", "freezing", "not working", "showing errors", "running slow"]),
    ("indicator1", &["power light", "connection light", "status LED"]),
    ("indicator2", &["internet light", "DSL light", "online indicator", "WAN light"]),
    ("issue_type", &["connection issue", "network problem", "configuration error", "signal problem"]),
    ("test_action", &["accessing a website", "making a call", "checking your service"]),
    ("time_of_day", &["morning", "afternoon", "evening"]),
    ("product", &["internet service", "mobile plans", "cable packages", "bundle deals"]),
    ("discount", &["10", "15", "20", "25", "30"]),
    ("tier", &["premium", "basic", "professional", "family", "business"]),
    ("period", &["three months", "six months", "the first year"]),
    ("feature1", &["unlimited data", "24/7 support", "free installation"]),
    ("feature2", &["priority customer service", "no contracts", "free equipment"]),
    ("feature3", &["exclusive features", "cloud storage", "streaming services"]),
    (
        "request_type",
        &["update my address", "change my payment method", "upgrade my plan", "cancel a service"],
    ),
    ("verification_field", &["date of birth", "last four digits of your social", "account PIN"]),
    ("verification_value", &["January 15th", "5432", "1234"]),
    ("action", &["process that change", "update that information", "make that modification"]),
    ("timeframe", &["24-48 hours", "1-2 business days", "by end of day", "within the hour"]),
    ("notification_method", &["via email", "via text message", "in your online account"]),
    ("time", &["an hour", "24 hours", "the next business day"]),
    (
        "greeting",
        &["Thank you for calling", "Hello, thank you for contacting us", "Good day, thanks for calling"],
    ),
    (
        "issue",
        &["the service quality", "my recent experience", "this billing error", "the lack of response"],
    ),
    ("duration", &["a week", "two weeks", "over a month", "several days"]),
    (
        "resolution_action",
        &[
            "escalate this to a supervisor",
            "process a refund",
            "upgrade your service at no charge",
            "apply a credit to your account",
        ],
    ),
    (
        "action_completed",
        &["processed the request", "escalated your case", "applied the credit", "scheduled a technician"],
    ),
    (
        "compensation_offer",
        &[
            "credit one month of service",
            "waive the service fee",
            "provide a discount on your next bill",
            "upgrade you at no extra charge",
        ],
    ),
];

const CUSTOMER_FILLER: &[&str] = &["I see.", "Okay, got it.", "Understood.", "That makes sense.", "Alright."];
const AGENT_FILLER: &[&str] = &[
    "Let me check on that for you.",
    "One moment please.",
    "I'm looking into that now.",
    "Give me just a second.",
];

const DOMAINS: &[&str] = &["billing", "technical_support", "sales", "customer_service"];
const TOPICS: &[&str] = &["inbound", "outbound"];
const ACCENTS: &[&str] = &["american", "british", "indian", "filipino", "australian"];

/// 🎭 Seeded conversation factory.
pub struct SyntheticGenerator {
    config: SyntheticConfig,
    rng: StdRng,
}

impl SyntheticGenerator {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    /// 🏭 Every conversation, in order, flattened into one utterance list.
    pub fn generate(mut self) -> Vec<Utterance> {
        info!(
            "🎭 generating {} synthetic conversations (seed: {:?})",
            self.config.conversations, self.config.seed
        );
        (0..self.config.conversations)
            .flat_map(|i| self.conversation(&format!("conv_{i:06}")))
            .collect::<Vec<_>>()
    }

    fn conversation(&mut self, conversation_id: &str) -> Vec<Utterance> {
        let script = *SCRIPTS.choose(&mut self.rng).unwrap_or(&BILLING);
        let mut lines: Vec<(&'static str, &'static str)> = script.to_vec();

        // 🎲 three calls in ten run long: somebody says "one moment please" a few extra times
        if self.rng.random_bool(0.3) {
            let extensions = self.rng.random_range(1..=5);
            for _ in 0..extensions {
                let idx = self.rng.random_range(1..=script.len() - 2);
                let speaker = script[idx].0;
                let filler = if speaker == "customer" { CUSTOMER_FILLER } else { AGENT_FILLER };
                lines.insert(idx + 1, (speaker, pick(&mut self.rng, filler)));
            }
        }

        let mut clock = 0.0f64;
        let mut utterances = Vec::with_capacity(lines.len());
        for (utterance_id, (speaker, template)) in lines.into_iter().enumerate() {
            let text = self.fill(template);
            let words = text.split_whitespace().count() as f64;
            let duration = words * self.rng.random_range(0.4..0.6);
            utterances.push(Utterance {
                conversation_id: conversation_id.to_string(),
                utterance_id: utterance_id as u32,
                speaker: speaker.to_string(),
                text,
                confidence: round_to(0.92 + self.rng.random::<f64>() * 0.08, 4),
                start_time: round_to(clock, 2),
                end_time: round_to(clock + duration, 2),
                domain: Some(pick(&mut self.rng, DOMAINS).to_string()),
                topic: Some(pick(&mut self.rng, TOPICS).to_string()),
                accent: Some(pick(&mut self.rng, ACCENTS).to_string()),
            });
            // ⏸️ people breathe between sentences, allegedly
            clock += duration + self.rng.random_range(0.2..1.5);
        }
        utterances
    }

    fn fill(&mut self, template: &str) -> String {
        let mut text = template.to_string();
        while let Some(open) = text.find('{') {
            let Some(close) = text[open..].find('}').map(|c| open + c) else {
                break;
            };
            let value = self.fill_blank(&text[open + 1..close]);
            text.replace_range(open..=close, &value);
        }
        text
    }

    fn fill_blank(&mut self, key: &str) -> String {
        match key {
            "account_num" => self.rng.random_range(10_000..=99_999).to_string(),
            "price" => format!("{}.99", self.rng.random_range(29..=99)),
            _ => BLANKS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, options)| pick(&mut self.rng, options).to_string())
                .unwrap_or_default(),
        }
    }
}

fn pick(rng: &mut StdRng, options: &[&'static str]) -> &'static str {
    options.choose(rng).copied().unwrap_or_default()
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// 💾 Write utterances as JSONL, gzipped when the path ends in `.gz`. Returns lines written.
pub fn write_jsonl(path: &Path, utterances: &[Utterance]) -> Result<usize, FeedError> {
    let io_err = |e: std::io::Error| {
        FeedError::Configuration(format!("💀 could not write '{}': {e}", path.display()))
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = std::fs::File::create(path).map_err(io_err)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut squisher = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        write_lines(&mut squisher, utterances).map_err(io_err)?;
        squisher.finish().map_err(io_err)?;
    } else {
        let mut out = BufWriter::new(file);
        write_lines(&mut out, utterances).map_err(io_err)?;
        out.flush().map_err(io_err)?;
    }
    info!("💾 wrote {} utterances to {}", utterances.len(), path.display());
    Ok(utterances.len())
}

fn write_lines(out: &mut impl Write, utterances: &[Utterance]) -> std::io::Result<()> {
    for utterance in utterances {
        serde_json::to_writer(&mut *out, utterance)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(conversations: usize, seed: u64) -> Vec<Utterance> {
        SyntheticGenerator::new(SyntheticConfig {
            conversations,
            seed: Some(seed),
        })
        .generate()
    }

    #[test]
    fn the_one_where_the_same_seed_tells_the_same_story() {
        assert_eq!(seeded(20, 42), seeded(20, 42));
        assert_ne!(seeded(20, 42), seeded(20, 43));
    }

    #[test]
    fn the_one_where_every_conversation_looks_like_a_phone_call() {
        let the_calls = seeded(50, 7);
        let mut the_current = String::new();
        let mut the_expected_id = 0u32;
        let mut the_last_end = 0.0f64;
        for u in &the_calls {
            if u.conversation_id != the_current {
                the_current = u.conversation_id.clone();
                the_expected_id = 0;
                the_last_end = 0.0;
            }
            assert_eq!(u.utterance_id, the_expected_id, "ids are contiguous from zero");
            assert!(u.start_time >= the_last_end, "nobody talks over anybody in the synthetic world");
            assert!(u.end_time >= u.start_time);
            assert!((0.92..=1.0).contains(&u.confidence));
            assert!(!u.text.contains('{'), "unfilled blank in {:?}", u.text);
            assert!(u.speaker == "agent" || u.speaker == "customer");
            assert!(DOMAINS.contains(&u.domain.as_deref().unwrap_or("nope")));
            the_expected_id += 1;
            the_last_end = u.end_time;
        }
        assert_eq!(the_calls.first().map(|u| u.conversation_id.as_str()), Some("conv_000000"));
        assert_eq!(the_calls.last().map(|u| u.conversation_id.as_str()), Some("conv_000049"));
    }

    #[test]
    fn the_one_where_conversation_lengths_stay_in_the_script_range() {
        let the_calls = seeded(200, 99);
        let mut the_lengths = std::collections::HashMap::<&str, usize>::new();
        for u in &the_calls {
            *the_lengths.entry(u.conversation_id.as_str()).or_default() += 1;
        }
        assert_eq!(the_lengths.len(), 200);
        // 🧪 shortest script is 11 lines, longest is 14 plus up to 5 fillers
        assert!(the_lengths.values().all(|&n| (11..=19).contains(&n)));
    }

    #[test]
    fn the_one_where_the_generated_file_loads_back_gzipped() -> anyhow::Result<()> {
        let the_dir = tempfile::tempdir()?;
        let the_path = the_dir.path().join("nested/conversations.jsonl.gz");
        let the_calls = seeded(5, 1);
        let the_count = write_jsonl(&the_path, &the_calls)?;
        assert_eq!(the_count, the_calls.len());

        let the_raw = std::fs::read(&the_path)?;
        assert!(the_raw.starts_with(&[0x1f, 0x8b]));
        let the_reloaded: Vec<Utterance> = super::super::parse_jsonl(&the_raw, "gen")?;
        assert_eq!(the_reloaded, the_calls);
        Ok(())
    }
}
