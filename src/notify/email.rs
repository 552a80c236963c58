use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Channel, Notice};

pub struct EmailChannel {
    name: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// `credentials` is `(user, password)`. Addresses are validated here.
    pub fn new(
        name: &str,
        smtp_host: &str,
        smtp_port: Option<u16>,
        credentials: Option<(String, String)>,
        from: &str,
        to: &[String],
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .with_context(|| format!("invalid SMTP host {smtp_host}"))?;
        if let Some(port) = smtp_port {
            builder = builder.port(port);
        }
        if let Some((user, pass)) = credentials {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        let from = from
            .parse()
            .with_context(|| format!("invalid sender address {from}"))?;
        let to = to
            .iter()
            .map(|a| {
                a.parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address {a}"))
            })
            .collect::<Result<Vec<_>>>()?;
        anyhow::ensure!(!to.is_empty(), "email channel needs at least one recipient");

        Ok(Self {
            name: name.to_string(),
            mailer: builder.build(),
            from,
            to,
        })
    }

    fn message(&self, notice: &Notice) -> Result<Message> {
        let subject = if notice.critical {
            format!("[CRITICAL] {}", notice.title)
        } else {
            notice.title.clone()
        };
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for rcpt in &self.to {
            builder = builder.to(rcpt.clone());
        }
        builder
            .header(header::ContentType::TEXT_PLAIN)
            .body(format!("{}\n\nAlert id: {}\n", notice.body, notice.tag))
            .context("build email")
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        let msg = self.message(notice)?;
        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }
}
