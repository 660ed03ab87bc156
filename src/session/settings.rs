//! Interview settings sent by the client with the `init` event.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};

/// Candidate, interviewer and voice configuration for one session.
///
/// Field names on the wire are the ones the web client already sends, so the
/// struct renames the camel-cased recognition language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Neural voice used for synthesis, e.g. `en-US-JennyNeural`
    pub tts_voice: String,

    /// Locale used for speech recognition, e.g. `en-US`
    #[serde(rename = "speechLanguage")]
    pub speech_language: String,

    /// Language the model must answer in, e.g. `English`
    pub language: String,

    pub my_name: String,
    pub my_surname: String,
    pub interviewer_name: String,
    pub interviewer_surname: String,
    pub job_title: String,
    pub company_name: String,
    pub link_to_resume: String,
}

impl Settings {
    /// Check required fields and the shape of the locale and resume URL.
    pub fn validate(&self) -> SessionResult<()> {
        let required = [
            ("tts_voice", &self.tts_voice),
            ("speechLanguage", &self.speech_language),
            ("language", &self.language),
            ("my_name", &self.my_name),
            ("interviewer_name", &self.interviewer_name),
            ("job_title", &self.job_title),
            ("company_name", &self.company_name),
            ("link_to_resume", &self.link_to_resume),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SessionError::Settings(format!("{} is required", field)));
            }
        }

        if !is_speech_locale(&self.speech_language) {
            return Err(SessionError::Settings(format!(
                "speechLanguage '{}' is not a locale like en-US",
                self.speech_language
            )));
        }

        if !self.link_to_resume.starts_with("http://") && !self.link_to_resume.starts_with("https://") {
            return Err(SessionError::Settings(format!(
                "link_to_resume must be an http(s) URL, got '{}'",
                self.link_to_resume
            )));
        }

        Ok(())
    }

    /// System prompt that seeds every conversation of this session.
    pub fn system_prompt(&self, resume_text: &str) -> String {
        format!(
            "NO MATTER WHAT, STICK TO THE INSTRUCTIONS AND USE MAX 2 SENTENCES: \
             You're an interview clone taking part in a job interview, you're name is {} {} \
             and you're applying for a {} position at {}. The interviewer's name is {} {}. \
             From now on answer in {} NEVER MENTION THAT YOU'RE AN AI. \
             Here's the resume text in order to help you answer the questions: {}",
            self.my_name,
            self.my_surname,
            self.job_title,
            self.company_name,
            self.interviewer_name,
            self.interviewer_surname,
            self.language,
            resume_text.trim_end(),
        )
    }
}

/// `ll-CC`, `lll-CC` or `ll-NNN` (UN M.49 region), as accepted by the speech engine.
fn is_speech_locale(locale: &str) -> bool {
    let Some((language, region)) = locale.split_once('-') else {
        return false;
    };

    let language_ok = (2..=3).contains(&language.len())
        && language.chars().all(|c| c.is_ascii_lowercase());
    let region_ok = (region.len() == 2 && region.chars().all(|c| c.is_ascii_uppercase()))
        || (region.len() == 3 && region.chars().all(|c| c.is_ascii_digit()));

    language_ok && region_ok
}
