//! Outbound email.
//!
//! Handlers only see the [`Notifier`] trait. When SMTP is not configured the
//! [`LogNotifier`] writes the message to the log instead of sending it.

use std::sync::Arc;

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{info, instrument, warn};

use crate::auth::User;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::Instance;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), AppError>;
}

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpNotifier {
    pub fn new(config: &AppConfig, host: &str) -> Result<Self, AppError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| AppError::ExternalService(format!("Invalid SMTP relay {}: {}", host, e)))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: config.mail_from.clone(),
        })
    }
}

#[rocket::async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip_all, fields(recipient = %notification.recipient))]
    async fn send(&self, notification: &Notification) -> Result<(), AppError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| AppError::ExternalService(format!("Invalid sender address: {}", e)))?;
        let to: Mailbox = notification
            .recipient
            .parse()
            .map_err(|e| AppError::ExternalService(format!("Invalid recipient address: {}", e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| AppError::ExternalService(format!("Could not build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::ExternalService(format!("SMTP delivery failed: {}", e)))?;

        info!("Email sent");
        Ok(())
    }
}

/// Logs every message instead of sending it.
pub struct LogNotifier;

#[rocket::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), AppError> {
        warn!("SMTP not configured, logging email instead of sending");
        info!(
            to = %notification.recipient,
            subject = %notification.subject,
            "=== EMAIL (not sent) ===\n{}",
            notification.body
        );
        Ok(())
    }
}

pub fn notifier_from_config(config: &AppConfig) -> Result<Arc<dyn Notifier>, AppError> {
    match config.smtp_host.as_deref() {
        Some(host) if config.smtp_configured() => {
            info!(host, port = config.smtp_port, "Using SMTP notifier");
            Ok(Arc::new(SmtpNotifier::new(config, host.trim())?))
        }
        _ => {
            info!("Using logging notifier");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Sends after the mutation has been stored. A failure never undoes the
/// mutation; it comes back as a warning for the response body.
pub async fn deliver(notifier: &dyn Notifier, notification: Notification) -> Option<String> {
    match notifier.send(&notification).await {
        Ok(()) => None,
        Err(err) => {
            err.log_and_record("Notification delivery");
            Some(format!(
                "Email to {} could not be sent: {}",
                notification.recipient, err
            ))
        }
    }
}

pub fn dashboard_invitation(user: &User, public_url: &str) -> Notification {
    Notification::new(
        &user.email,
        "Your workbook dashboard",
        format!(
            "Hello {},\n\nYour personal dashboard is ready:\n{}\n\nThe link is valid until {}.",
            user.name,
            user.dashboard_url(public_url),
            user.link_expires_at.format("%Y-%m-%d")
        ),
    )
}

pub fn workbooks_assigned(user: &User, instances: &[Instance], public_url: &str) -> Notification {
    let titles = instances
        .iter()
        .map(|i| format!("- {}", i.title))
        .collect::<Vec<_>>()
        .join("\n");

    Notification::new(
        &user.email,
        "New workbooks assigned",
        format!(
            "Hello {},\n\nThe following workbooks have been assigned to you:\n{}\n\nOpen your dashboard:\n{}",
            user.name,
            titles,
            user.dashboard_url(public_url)
        ),
    )
}

pub fn dashboard_reactivated(user: &User, public_url: &str) -> Notification {
    Notification::new(
        &user.email,
        "Your dashboard has been reopened",
        format!(
            "Hello {},\n\nYour dashboard is available again until {}:\n{}",
            user.name,
            user.link_expires_at.format("%Y-%m-%d"),
            user.dashboard_url(public_url)
        ),
    )
}

pub fn workbook_reviewed(user: &User, instance: &Instance, public_url: &str) -> Notification {
    Notification::new(
        &user.email,
        format!("Workbook reviewed: {}", instance.title),
        format!(
            "Hello {},\n\nYour workbook \"{}\" has been reviewed.\n\n{}",
            user.name,
            instance.title,
            user.dashboard_url(public_url)
        ),
    )
}

pub fn workbook_submitted(admin_email: &str, user: &User, instance: &Instance) -> Notification {
    Notification::new(
        admin_email,
        format!("Workbook submitted: {}", instance.title),
        format!(
            "{} <{}> submitted \"{}\" (workbook {}).",
            user.name, user.email, instance.title, instance.id
        ),
    )
}
