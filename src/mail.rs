//! Outbound email, through an HTTP mail relay.

#[cfg(test)]
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

#[cfg(not(test))]
use reqwest::Response;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::common::Email;

/// Configuration for the mail relay.
#[derive(Deserialize)]
struct MailConfig {
    // non-secrets
    mail_api_url: String,
    mail_sender: String,
    // secrets
    mail_api_key: String,
}

/// The JSON body the relay accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// Sends mail on behalf of the application. Lives in managed state.
#[cfg_attr(test, allow(dead_code))]
pub struct Mailer {
    http: reqwest::Client,
    url: String,
    api_key: String,
    sender: String,
    #[cfg(test)]
    outbox: Mutex<Vec<OutgoingMail>>,
    #[cfg(test)]
    fail_next: AtomicBool,
}

impl Mailer {
    fn new(config: MailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.mail_api_url,
            api_key: config.mail_api_key,
            sender: config.mail_sender,
            #[cfg(test)]
            outbox: Mutex::new(Vec::new()),
            #[cfg(test)]
            fail_next: AtomicBool::new(false),
        }
    }

    /// Send a plain-text message to `to`. Any transport failure or non-success
    /// response from the relay is a [`Error::Delivery`].
    pub async fn send(&self, to: &Email, subject: &str, text: &str) -> Result<()> {
        let mail = OutgoingMail {
            from: self.sender.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            text: text.to_string(),
        };
        self.deliver(mail).await?;
        debug!("Sent '{subject}' to {to}");
        Ok(())
    }

    #[cfg(not(test))]
    async fn deliver(&self, mail: OutgoingMail) -> Result<()> {
        self.http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&mail)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| Error::Delivery(e.to_string()))?;
        Ok(())
    }

    /// Test builds never touch the network: mail lands in the outbox.
    #[cfg(test)]
    async fn deliver(&self, mail: OutgoingMail) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Delivery("relay unavailable".to_string()));
        }
        self.outbox
            .lock()
            .expect("Outbox lock poisoned")
            .push(mail);
        Ok(())
    }
}

#[cfg(test)]
impl Mailer {
    /// Make the next delivery fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Every message sent so far.
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.outbox.lock().expect("Outbox lock poisoned").clone()
    }

    /// The most recent one-time code mailed to `to`, if any.
    pub fn last_code_for(&self, to: &Email) -> Option<crate::model::api::otp::Code> {
        self.sent()
            .into_iter()
            .rev()
            .find(|mail| mail.to == **to)
            .and_then(|mail| {
                mail.text
                    .split(|c: char| !c.is_ascii_digit())
                    .find(|word| word.len() == crate::model::api::otp::CODE_LENGTH)
                    .and_then(|word| word.parse().ok())
            })
    }
}

/// A fairing that loads the mail relay config and places a [`Mailer`] into
/// managed state.
pub struct MailerFairing;

#[rocket::async_trait]
impl Fairing for MailerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Mail relay",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<MailConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load mail config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded mail relay config for {}", config.mail_api_url);

        // Manage the state.
        rocket = rocket.manage(Mailer::new(config));
        Ok(rocket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> Mailer {
        Mailer::new(MailConfig {
            mail_api_url: "http://localhost:9/send".to_string(),
            mail_sender: "elections@sggs.ac.in".to_string(),
            mail_api_key: "key".to_string(),
        })
    }

    #[rocket::async_test]
    async fn sent_mail_is_recorded() {
        let mailer = mailer();
        mailer
            .send(&Email::example(), "Your code", "Your code is 482913.")
            .await
            .unwrap();
        let sent = mailer.sent();
        assert_eq!(1, sent.len());
        assert_eq!("elections@sggs.ac.in", sent[0].from);
        assert_eq!("a@sggs.ac.in", sent[0].to);
        assert_eq!(
            Some(482913),
            mailer.last_code_for(&Email::example()).map(|c| c.value())
        );
        assert_eq!(None, mailer.last_code_for(&Email::example2()));
    }

    #[rocket::async_test]
    async fn failures_are_delivery_errors() {
        let mailer = mailer();
        mailer.fail_next();
        let result = mailer.send(&Email::example(), "Your code", "123456").await;
        assert!(matches!(result, Err(Error::Delivery(_))));
        assert!(mailer.sent().is_empty());
        // Only the next delivery fails.
        assert!(mailer.send(&Email::example(), "Your code", "123456").await.is_ok());
    }
}
