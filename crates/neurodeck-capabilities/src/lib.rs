//! Concrete capability adapters for the Neurodeck dispatcher.
//!
//! Each adapter implements the engine's [`Capability`] trait: one bounded
//! operation, JSON request in, JSON payload or typed error out. The set
//! covers everything the built-in workflows reference:
//!
//! - `capture` -- [`ScreenCapture`], platform screen-capture command
//! - `vision` -- [`VisionAnalyzer`], image understanding over a chat API
//! - `geolocate` -- [`IpGeolocator`], coarse position from ipinfo.io
//! - `notify` -- [`SmsNotifier`], outbound SMS via Twilio
//! - `speak` -- [`SpeechSynthesizer`], command-line text-to-speech chain
//! - `journal` -- [`JsonlJournal`], append-only JSON-lines run log
//! - `select_phrase` -- [`PhraseSelector`], built-in comfort phrase lists

pub mod capture;
pub mod config;
pub mod geolocate;
pub mod journal;
pub mod notify;
pub mod phrases;
pub mod speech;
pub mod vision;

use std::sync::Arc;

use neurodeck_engine::{Capability, CapabilitySet};

pub use capture::ScreenCapture;
pub use config::{Credentials, Settings, SettingsError};
pub use geolocate::IpGeolocator;
pub use journal::JsonlJournal;
pub use notify::SmsNotifier;
pub use phrases::PhraseSelector;
pub use speech::{SpeechSynthesizer, TtsEngine};
pub use vision::VisionAnalyzer;

/// Build the full adapter set the built-in workflows need, wired from one
/// settings bundle.
pub fn standard_set(settings: &Settings) -> CapabilitySet {
    let credentials = &settings.credentials;
    CapabilitySet::new()
        .with_capability(Arc::new(ScreenCapture::new(&settings.capture)))
        .with_capability(Arc::new(VisionAnalyzer::new(
            &settings.vision,
            credentials.cohere_api_key.clone(),
        )))
        .with_capability(Arc::new(IpGeolocator::new(
            credentials.ipinfo_token.clone(),
        )))
        .with_capability(Arc::new(SmsNotifier::from_credentials(credentials)))
        .with_capability(Arc::new(SpeechSynthesizer::new(&settings.speech)))
        .with_capability(Arc::new(JsonlJournal::new(settings.journal.path.clone())))
        .with_capability(Arc::new(PhraseSelector::new()))
}
