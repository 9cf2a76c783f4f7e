// Weatherpi - Environmental sampling job for a Raspberry PI
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::config::MailSettings;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use std::error::Error;
use std::fmt::{self, Formatter};

pub const SUBJECT: &str = "[ Weather-monitor ]";
pub const SENDER_NAME: &str = "Weather-monitor";

/// Error building or sending a notification
#[derive(Debug)]
pub enum NotifyError {
    Message(&'static str, Box<dyn Error + Send + Sync>),
    Transport(&'static str, Box<dyn Error + Send + Sync>),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Message(msg, ref e) => write!(f, "{}: {}", msg, e),
            NotifyError::Transport(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for NotifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NotifyError::Message(_, ref e) => Some(e.as_ref()),
            NotifyError::Transport(_, ref e) => Some(e.as_ref()),
        }
    }
}

/// Channel used to tell the operator something went wrong.
pub trait Notifier {
    fn send(&self, body: &str) -> Result<(), NotifyError>;
}

/// Send `body` using `notifier`, logging instead of returning any failure.
///
/// Notifications are never retried. Returns `true` if the notification was sent.
pub fn best_effort(notifier: &dyn Notifier, body: &str) -> bool {
    match notifier.send(body) {
        Ok(_) => {
            tracing::info!(message = "sent notification");
            true
        }
        Err(e) => {
            tracing::error!(message = "unable to send notification", body = body, error = %e);
            false
        }
    }
}

/// Notifier that sends a plain text email for each notification, opening a new
/// authenticated TLS connection to the relay every time.
#[derive(Debug)]
pub struct MailNotifier {
    settings: MailSettings,
}

impl MailNotifier {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }

    fn message(&self, body: &str) -> Result<Message, NotifyError> {
        let address: Address = self
            .settings
            .username
            .parse()
            .map_err(|e| NotifyError::Message("invalid sender address", Box::new(e)))?;
        let to: Mailbox = self
            .settings
            .recipient
            .parse()
            .map_err(|e| NotifyError::Message("invalid recipient address", Box::new(e)))?;

        Message::builder()
            .from(Mailbox::new(Some(SENDER_NAME.to_owned()), address))
            .to(to)
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_owned())
            .map_err(|e| NotifyError::Message("unable to build message", Box::new(e)))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let credentials = Credentials::new(
            self.settings.username.clone(),
            self.settings.password.expose().to_owned(),
        );

        let transport = SmtpTransport::relay(&self.settings.server)
            .map_err(|e| NotifyError::Transport("unable to configure mail relay", Box::new(e)))?
            .port(self.settings.port)
            .credentials(credentials)
            .build();

        Ok(transport)
    }
}

impl Notifier for MailNotifier {
    fn send(&self, body: &str) -> Result<(), NotifyError> {
        let message = self.message(body)?;
        let transport = self.transport()?;

        transport
            .send(&message)
            .map_err(|e| NotifyError::Transport("unable to send message via relay", Box::new(e)))?;

        tracing::debug!(
            message = "sent mail",
            server = %self.settings.server,
            recipient = %self.settings.recipient
        );
        Ok(())
    }
}

/// Notifier used when no mail settings are available. Notifications are only logged.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, body: &str) -> Result<(), NotifyError> {
        tracing::warn!(message = "mail is not configured, notification only logged", body = body);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use self::test::RecordingNotifier;
