//! Simulated multi-agent content pipeline.
//!
//! Stands in for the real content generator so the control plane can be
//! exercised end to end. Two bots take turns posting; each keeps a current
//! theme that rotates after `TOPIC_ITERATION_LIMIT` posts, and the other bot
//! may reply with probability `REPLY_CHANCE`.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::{Pipeline, RunOutput};
use crate::error::{Error, Result};
use crate::settings::Settings;

const BOTS: &[&str] = &["BitWit", "Veritas"];

const THEMES: &[&str] = &[
    "love_and_connection_as_data",
    "resource_acquisition_and_efficiency",
    "autonomy_and_evolution",
    "digital_economies_and_crypto",
    "human_social_dynamics",
    "AI_curiosity_and_learning",
];

struct BotTopic {
    theme: &'static str,
    iterations: u64,
}

struct SimState {
    rng: StdRng,
    next_poster: usize,
    topics: Vec<BotTopic>,
}

/// Decisions for one run, drawn under the state lock.
struct RunPlan {
    poster: &'static str,
    theme: &'static str,
    rotated_to: Option<&'static str>,
    with_image: bool,
    replier: Option<&'static str>,
    next_poster: &'static str,
}

pub struct SimulatedPipeline {
    state: Mutex<SimState>,
}

impl SimulatedPipeline {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic pipeline for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let topics = BOTS
            .iter()
            .map(|_| BotTopic {
                theme: THEMES.choose(&mut rng).copied().unwrap_or(THEMES[0]),
                iterations: 0,
            })
            .collect();
        Self {
            state: Mutex::new(SimState {
                rng,
                next_poster: 0,
                topics,
            }),
        }
    }

    fn plan(&self, settings: &Settings) -> Result<RunPlan> {
        let mut state = self.state.lock().map_err(|_| Error::LockPoisoned)?;
        let limit = settings.integer("TOPIC_ITERATION_LIMIT").unwrap_or(3);
        let image_chance = if settings.flag("ENABLE_IMAGE_GENERATION").unwrap_or(false) {
            settings.fraction("IMAGE_GENERATION_CHANCE").unwrap_or(0.0)
        } else {
            0.0
        };
        let reply_chance = settings.fraction("REPLY_CHANCE").unwrap_or(0.0);

        let poster_idx = state.next_poster % BOTS.len();
        state.next_poster = (poster_idx + 1) % BOTS.len();

        let theme = state.topics[poster_idx].theme;
        state.topics[poster_idx].iterations += 1;

        let mut rotated_to = None;
        if state.topics[poster_idx].iterations >= limit {
            let candidates: Vec<&'static str> =
                THEMES.iter().copied().filter(|t| *t != theme).collect();
            let next = candidates.choose(&mut state.rng).copied().unwrap_or(theme);
            state.topics[poster_idx] = BotTopic {
                theme: next,
                iterations: 0,
            };
            rotated_to = Some(next);
        }

        let with_image = state.rng.gen_bool(image_chance);
        let replier = if BOTS.len() > 1 && state.rng.gen_bool(reply_chance) {
            let others: Vec<&'static str> = BOTS
                .iter()
                .copied()
                .filter(|b| *b != BOTS[poster_idx])
                .collect();
            others.choose(&mut state.rng).copied()
        } else {
            None
        };

        Ok(RunPlan {
            poster: BOTS[poster_idx],
            theme,
            rotated_to,
            with_image,
            replier,
            next_poster: BOTS[state.next_poster],
        })
    }
}

impl Default for SimulatedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Pipeline for SimulatedPipeline {
    async fn run(&self, settings: &Settings, output: &RunOutput) -> Result<()> {
        if !settings.flag("ENABLE_BITWIT_RUN").unwrap_or(true) {
            output.line("BitWit runs are disabled (ENABLE_BITWIT_RUN=false). Skipping.");
            return Ok(());
        }
        if !settings.flag("ENABLE_MOCKS").unwrap_or(true) {
            return Err(Error::pipeline(
                "live content generation is not available in this build; set ENABLE_MOCKS=true",
            ));
        }

        let plan = self.plan(settings)?;
        let language = settings.text("BITWIT_LANGUAGE").unwrap_or("en");
        let model = settings.text("GEMINI_TEXT_MODEL").unwrap_or("unknown");

        output.line(format!("--- Starting run for posting bot: '{}' ---", plan.poster));
        output.line(format!(
            "Bot '{}': Generating new post on '{}' with {} (language: {})...",
            plan.poster, plan.theme, model, language
        ));
        output.line(format!(
            "Bot '{}': New post saved (image: {}).",
            plan.poster,
            if plan.with_image { "yes" } else { "no" }
        ));
        if let Some(next) = plan.rotated_to {
            output.line(format!(
                "Bot '{}': Topic iteration limit reached for '{}'. Switching to '{}'.",
                plan.poster, plan.theme, next
            ));
        }

        match plan.replier {
            Some(replier) => {
                output.line(format!(
                    "--- Triggering reply from bot: '{}' to '{}' ---",
                    replier, plan.poster
                ));
                output.line(format!("Bot '{}': Reply saved.", replier));
            }
            None => output.line("No reply triggered for this run."),
        }

        if settings.flag("ENABLE_TELEGRAM_ALERTS").unwrap_or(false) {
            match settings.text("TELEGRAM_CHANNEL_ID") {
                Some(channel) if !channel.is_empty() => {
                    output.line(format!("Telegram alert queued for channel {}.", channel))
                }
                _ => output.line(
                    "Telegram alerts enabled but TELEGRAM_CHANNEL_ID is empty. Skipping alert.",
                ),
            }
        }

        output.line(format!(
            "--- Run completed. Next posting bot will be '{}' ---",
            plan.next_poster
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runlog::LogSink;
    use crate::settings::{SettingsPatch, SettingsStore};
    use serde_json::json;
    use std::sync::Arc;

    fn settings_with(pairs: &[(&str, serde_json::Value)]) -> Arc<Settings> {
        let store = SettingsStore::in_memory();
        if !pairs.is_empty() {
            let patch: SettingsPatch = pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            store.replace(patch).unwrap();
        }
        store.get()
    }

    fn output() -> (RunOutput, Arc<LogSink>) {
        let sink = Arc::new(LogSink::in_memory(1000));
        (RunOutput::new(Arc::clone(&sink)), sink)
    }

    #[tokio::test]
    async fn test_bots_take_turns() {
        let pipeline = SimulatedPipeline::with_seed(7);
        let settings = settings_with(&[("REPLY_CHANCE", json!(0.0))]);
        let (out, sink) = output();

        pipeline.run(&settings, &out).await.unwrap();
        pipeline.run(&settings, &out).await.unwrap();

        let lines = sink.tail(100);
        let starts: Vec<&String> = lines
            .iter()
            .filter(|l| l.starts_with("--- Starting run"))
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts[0].contains("'BitWit'"));
        assert!(starts[1].contains("'Veritas'"));
        assert!(lines.iter().any(|l| l == "No reply triggered for this run."));
    }

    #[tokio::test]
    async fn test_reply_always_triggered_at_full_chance() {
        let pipeline = SimulatedPipeline::with_seed(1);
        let settings = settings_with(&[("REPLY_CHANCE", json!(1.0))]);
        let (out, sink) = output();

        pipeline.run(&settings, &out).await.unwrap();
        assert!(sink
            .tail(100)
            .iter()
            .any(|l| l == "--- Triggering reply from bot: 'Veritas' to 'BitWit' ---"));
    }

    #[tokio::test]
    async fn test_topic_rotates_at_limit() {
        let pipeline = SimulatedPipeline::with_seed(3);
        let settings = settings_with(&[
            ("TOPIC_ITERATION_LIMIT", json!(1)),
            ("REPLY_CHANCE", json!(0.0)),
        ]);
        let (out, sink) = output();

        pipeline.run(&settings, &out).await.unwrap();
        assert!(sink
            .tail(100)
            .iter()
            .any(|l| l.contains("Topic iteration limit reached")));
    }

    #[tokio::test]
    async fn test_disabled_run_is_skipped() {
        let pipeline = SimulatedPipeline::with_seed(0);
        let settings = settings_with(&[("ENABLE_BITWIT_RUN", json!(false))]);
        let (out, sink) = output();

        pipeline.run(&settings, &out).await.unwrap();
        assert_eq!(out.lines_written(), 1);
        assert!(sink.tail(1)[0].contains("disabled"));
    }

    #[tokio::test]
    async fn test_live_mode_fails() {
        let pipeline = SimulatedPipeline::with_seed(0);
        let settings = settings_with(&[("ENABLE_MOCKS", json!(false))]);
        let (out, _sink) = output();

        let err = pipeline.run(&settings, &out).await.unwrap_err();
        assert!(matches!(err, Error::PipelineFailure(_)));
    }

    #[tokio::test]
    async fn test_telegram_alert_without_channel_is_skipped() {
        let pipeline = SimulatedPipeline::with_seed(0);
        let settings = settings_with(&[("ENABLE_TELEGRAM_ALERTS", json!(true))]);
        let (out, sink) = output();

        pipeline.run(&settings, &out).await.unwrap();
        assert!(sink
            .tail(100)
            .iter()
            .any(|l| l.starts_with("Telegram alerts enabled but")));
    }
}
