//! Outgoing email: password reset links.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::{path::Path, time::Duration};
use tracing::{info, warn};

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

pub struct EmailService {
    transport: EmailTransport,
    from: String,
    base_url: String,
    reset_valid_for: Duration,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

fn internal(operation: &str, e: impl std::fmt::Display) -> Error {
    Error::Internal {
        operation: format!("{operation}: {e}"),
    }
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email = &config.email;

        let transport = match &email.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    warn!("SMTP TLS is disabled");
                }
                let builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(|e| internal("create SMTP transport", e))?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                };
                EmailTransport::Smtp(
                    builder
                        .port(*port)
                        .credentials(Credentials::new(username.clone(), password.clone()))
                        .build(),
                )
            }
            EmailTransportConfig::File { path } => {
                let dir = Path::new(path);
                std::fs::create_dir_all(dir).map_err(|e| internal("create emails directory", e))?;
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(dir))
            }
        };

        Ok(Self {
            transport,
            from: format!("{} <{}>", email.from_name, email.from_email),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            reset_valid_for: config.auth.password_reset_token_duration,
        })
    }

    pub fn password_reset_link(&self, token_id: &uuid::Uuid, token: &str) -> String {
        format!("{}/reset-password?id={}&token={}", self.base_url, token_id, token)
    }

    pub async fn send_password_reset_email(&self, to_email: &str, to_name: Option<&str>, token_id: &uuid::Uuid, token: &str) -> Result<(), Error> {
        let link = self.password_reset_link(token_id, token);
        let body = self.password_reset_body(to_name, &link);
        self.send(to_email, to_name, "Reset your Campus password", &body).await?;
        info!("Sent password reset email");
        Ok(())
    }

    async fn send(&self, to_email: &str, to_name: Option<&str>, subject: &str, body: &str) -> Result<(), Error> {
        let from = self.from.parse::<Mailbox>().map_err(|e| internal("parse from address", e))?;
        let to = match to_name {
            Some(name) => format!("{name} <{to_email}>"),
            None => to_email.to_string(),
        }
        .parse::<Mailbox>()
        .map_err(|e| internal("parse recipient address", e))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| internal("build email message", e))?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| internal("send SMTP email", e))?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| internal("write email file", e))?;
            }
        }
        Ok(())
    }

    fn password_reset_body(&self, to_name: Option<&str>, link: &str) -> String {
        let greeting = to_name.map(|name| format!("Hello {name},")).unwrap_or_else(|| "Hello,".to_string());
        let minutes = self.reset_valid_for.as_secs() / 60;

        format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Password reset</title></head>
<body style="font-family: Arial, sans-serif; color: #333;">
    <p>{greeting}</p>
    <p>Someone asked to reset the password of your Campus account. If it wasn't you, ignore this email.</p>
    <p><a href="{link}">Choose a new password</a></p>
    <p>{link}</p>
    <p>The link expires in {minutes} minutes.</p>
</body>
</html>"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;
    use uuid::Uuid;

    #[test]
    fn test_password_reset_body() {
        let mut config = create_test_config();
        config.base_url = "https://school.example/".to_string();
        let service = EmailService::new(&config).unwrap();

        let id = Uuid::nil();
        let link = service.password_reset_link(&id, "abc123");
        assert_eq!(
            link,
            "https://school.example/reset-password?id=00000000-0000-0000-0000-000000000000&token=abc123"
        );

        let body = service.password_reset_body(Some("Ada Lovelace"), &link);
        assert!(body.contains("Hello Ada Lovelace,"));
        assert!(body.contains(&link));
        assert!(body.contains("expires in 60 minutes"));
        assert!(service.password_reset_body(None, &link).contains("Hello,"));
    }

    #[tokio::test]
    async fn test_file_transport_writes_email() {
        let config = create_test_config();
        let EmailTransportConfig::File { path } = config.email.transport.clone() else {
            panic!("test config uses the file transport");
        };
        let service = EmailService::new(&config).unwrap();
        let before = std::fs::read_dir(&path).unwrap().count();

        service
            .send_password_reset_email("student@school.test", None, &Uuid::new_v4(), "tok")
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(&path).unwrap().count(), before + 1);
    }
}
