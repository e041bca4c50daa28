use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use service_core::error::AppError;
use service_core::grpc::proto::auth::OtpPurpose;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Subject and bodies of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub plain_body: String,
    pub html_body: String,
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, to_email: &str, email: &RenderedEmail) -> Result<(), AppError>;
}

struct OtpCopy {
    change_subject: &'static str,
    reset_subject: &'static str,
    intro: &'static str,
    expiry: &'static str,
    ignore: &'static str,
}

const ENGLISH: OtpCopy = OtpCopy {
    change_subject: "Your password change code",
    reset_subject: "Your password reset code",
    intro: "Use the following code to continue:",
    expiry: "The code expires in {minutes} minutes.",
    ignore: "If you did not request this, you can ignore this email.",
};

const SPANISH: OtpCopy = OtpCopy {
    change_subject: "Tu código para cambiar la contraseña",
    reset_subject: "Tu código para restablecer la contraseña",
    intro: "Usa el siguiente código para continuar:",
    expiry: "El código caduca en {minutes} minutos.",
    ignore: "Si no lo solicitaste, puedes ignorar este correo.",
};

fn copy_for(language: &str) -> &'static OtpCopy {
    let primary = language.split(['-', '_']).next().unwrap_or_default();
    if primary.eq_ignore_ascii_case("es") {
        &SPANISH
    } else {
        &ENGLISH
    }
}

/// Builds the notification carrying a plaintext one-time code. Unknown
/// languages fall back to English.
pub fn render_otp_email(
    purpose: OtpPurpose,
    language: &str,
    code: &str,
    ttl: Duration,
) -> Result<RenderedEmail, AppError> {
    let copy = copy_for(language);
    let subject = match purpose {
        OtpPurpose::PasswordChange => copy.change_subject,
        OtpPurpose::PasswordReset => copy.reset_subject,
        OtpPurpose::EmailVerification | OtpPurpose::Unspecified => {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "no notification template for purpose {}",
                purpose.as_key()
            )))
        }
    };

    let minutes = (ttl.as_secs() / 60).max(1).to_string();
    let expiry = copy.expiry.replace("{minutes}", &minutes);

    let plain_body = format!(
        "{}\n\n{}\n\n{}\n{}",
        copy.intro, code, expiry, copy.ignore
    );

    let html_body = format!(
        r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <p>{}</p>
        <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{}</p>
        <p style="color: #666; font-size: 12px;">{} {}</p>
    </body>
</html>"###,
        copy.intro, code, expiry, copy.ignore
    );

    Ok(RenderedEmail {
        subject: subject.to_string(),
        plain_body,
        html_body,
    })
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &crate::config::SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send(&self, to_email: &str, email: &RenderedEmail) -> Result<(), AppError> {
        let message = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::BadRequest(e.into()))?)
            .subject(email.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.plain_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(subject = %email.subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

/// Records messages instead of sending them.
#[derive(Default)]
pub struct MockEmailService {
    sent: Mutex<Vec<(String, RenderedEmail)>>,
    fail: AtomicBool,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    pub fn last_recipient(&self) -> Option<String> {
        self.sent
            .lock()
            .ok()
            .and_then(|sent| sent.last().map(|(to, _)| to.clone()))
    }

    /// The code from the most recent message: the first all-digit line of the
    /// plain body.
    pub fn last_code(&self) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        let (_, email) = sent.last()?;
        email
            .plain_body
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string)
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send(&self, to_email: &str, email: &RenderedEmail) -> Result<(), AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::EmailError("mock delivery failure".to_string()));
        }

        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock email mutex poisoned: {}", e))?
            .push((to_email.to_string(), email.clone()));
        Ok(())
    }
}
