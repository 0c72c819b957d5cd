//! Delivery transports for usage reports.
//!
//! - [`OutboxDelivery`] drops the CSV and its integrity receipt into a
//!   directory, for pickup by mail or sync tooling.
//! - [`WebhookDelivery`] POSTs the CSV to an HTTP endpoint.
//! - [`EmailDelivery`] mails the CSV as an attachment over SMTPS.

use super::Delivery;
use crate::error::{LatexGateError, Result, ResultExt as _};
use crate::export::LedgerExport;
use crate::integrity::receipt::{create_receipt, receipt_json, receipt_path_for};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport as _};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret as _, SecretString};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Default timeout for a webhook delivery.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the report id on webhook deliveries.
pub const REPORT_ID_HEADER: &str = "X-Usage-Report-Id";

/// Subject line of emailed reports.
pub const EMAIL_SUBJECT: &str = "Daily Student Usage Log";

/// Attachment name of emailed reports.
pub const EMAIL_ATTACHMENT_NAME: &str = "usage_log.csv";

const EMAIL_BODY: &str =
    "Attached is the daily student usage log for the handwriting-to-LaTeX tool.";

/// Default SMTPS relay and port.
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

/// Writes each report as `<outbox>/<file_name>.csv` plus a receipt.
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    dir: PathBuf,
}

impl OutboxDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_atomic(&self, final_path: &Path, bytes: &[u8]) -> Result<()> {
        let mut temp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file in {}", self.dir.display()))?;
        temp.write_all(bytes)
            .with_context(|| format!("Failed to write {}", final_path.display()))?;
        temp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync {}", final_path.display()))?;
        temp.persist(final_path)
            .with_context(|| format!("Failed to persist {}", final_path.display()))?;
        Ok(())
    }
}

impl Delivery for OutboxDelivery {
    fn deliver(&self, export: &LedgerExport) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create outbox {}", self.dir.display()))?;

        let file_name = export.file_name();
        let report_path = self.dir.join(&file_name);
        self.write_atomic(&report_path, &export.csv)?;

        let receipt = create_receipt(export, &file_name);
        let receipt_path = receipt_path_for(&report_path);
        if let Err(err) = receipt_json(&receipt)
            .and_then(|json| self.write_atomic(&receipt_path, json.as_bytes()))
        {
            // A report without a receipt is not a delivery.
            let _ignored: std::io::Result<()> = fs::remove_file(&report_path);
            return Err(err);
        }

        tracing::info!(
            report = %report_path.display(),
            rows = export.row_count(),
            "Usage report written to outbox"
        );
        Ok(())
    }
}

/// POSTs each report as `text/csv` to a fixed URL.
///
/// Any non-2xx status, connection error or timeout is a failed delivery.
#[derive(Debug)]
pub struct WebhookDelivery {
    client: Client,
    url: String,
    token: Option<SecretString>,
    timeout: Duration,
}

impl WebhookDelivery {
    /// Build a webhook transport.
    ///
    /// Must not be called from inside an async runtime; run it before
    /// entering one or from a blocking task.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if `url` is empty or the HTTP
    /// client cannot be built.
    pub fn new(url: impl Into<String>, token: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(LatexGateError::Config(
                "webhook url must not be empty".to_owned(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LatexGateError::Config(format!("http client build failed: {err}")))?;
        Ok(Self {
            client,
            url,
            token,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Delivery for WebhookDelivery {
    fn deliver(&self, export: &LedgerExport) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "text/csv")
            .header(REPORT_ID_HEADER, export.report_id.to_string())
            .body(export.csv.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                LatexGateError::DeliveryFailed(format!(
                    "webhook timed out after {}s",
                    self.timeout.as_secs()
                ))
            } else {
                LatexGateError::DeliveryFailed(format!("webhook request failed: {err}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LatexGateError::DeliveryFailed(format!(
                "webhook returned status {status}"
            )));
        }

        tracing::info!(url = %self.url, rows = export.row_count(), "Usage report posted");
        Ok(())
    }
}

/// Mails each report to a fixed receiver over implicit-TLS SMTP.
///
/// The sender address doubles as the SMTP login.
pub struct EmailDelivery {
    transport: SmtpTransport,
    sender: Mailbox,
    receiver: Mailbox,
    host: String,
}

impl std::fmt::Debug for EmailDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailDelivery")
            .field("host", &self.host)
            .field("sender", &self.sender.to_string())
            .field("receiver", &self.receiver.to_string())
            .finish_non_exhaustive()
    }
}

impl EmailDelivery {
    /// Build an email transport.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if an address does not parse or the
    /// SMTP relay cannot be set up.
    pub fn new(
        host: &str,
        port: u16,
        sender: &str,
        receiver: &str,
        password: &SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        let sender: Mailbox = sender
            .parse()
            .map_err(|err| LatexGateError::Config(format!("invalid email sender {sender:?}: {err}")))?;
        let receiver: Mailbox = receiver.parse().map_err(|err| {
            LatexGateError::Config(format!("invalid email receiver {receiver:?}: {err}"))
        })?;

        let credentials = Credentials::new(
            sender.email.to_string(),
            password.expose_secret().to_owned(),
        );
        let transport = SmtpTransport::relay(host)
            .map_err(|err| LatexGateError::Config(format!("smtp relay {host}: {err}")))?
            .port(port)
            .credentials(credentials)
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            transport,
            sender,
            receiver,
            host: host.to_owned(),
        })
    }

    /// The message sent for `export`.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::DeliveryFailed`] if the message cannot be
    /// assembled.
    pub fn message(&self, export: &LedgerExport) -> Result<Message> {
        let csv_type = ContentType::parse("text/csv")
            .map_err(|err| LatexGateError::Other(format!("content type: {err}")))?;
        let attachment =
            Attachment::new(EMAIL_ATTACHMENT_NAME.to_owned()).body(export.csv.clone(), csv_type);

        Message::builder()
            .from(self.sender.clone())
            .to(self.receiver.clone())
            .subject(EMAIL_SUBJECT)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(EMAIL_BODY.to_owned()))
                    .singlepart(attachment),
            )
            .map_err(|err| LatexGateError::DeliveryFailed(format!("building email: {err}")))
    }
}

impl Delivery for EmailDelivery {
    fn deliver(&self, export: &LedgerExport) -> Result<()> {
        let message = self.message(export)?;
        self.transport
            .send(&message)
            .map_err(|err| LatexGateError::DeliveryFailed(format!("smtp send via {}: {err}", self.host)))?;

        tracing::info!(
            host = %self.host,
            receiver = %self.receiver,
            rows = export.row_count(),
            "Usage report emailed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Identifier;
    use crate::integrity::verify_report;
    use crate::ledger::UsageEvent;
    use chrono::Utc;
    use std::io::{BufRead as _, BufReader, Read as _};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn export() -> LedgerExport {
        LedgerExport::from_events(vec![UsageEvent {
            identifier: Identifier::parse("12345", 5).unwrap(),
            timestamp: Utc::now(),
        }])
        .unwrap()
    }

    /// One-shot HTTP server answering with `status_line` after `delay`.
    /// Sends the received request head and body back over the channel.
    fn serve_once(status_line: &'static str, delay: Duration) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/reports", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0_usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                head.push_str(&line);
            }
            let mut body = vec![0_u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let _sent = tx.send(format!("{head}\n{}", String::from_utf8_lossy(&body)));

            std::thread::sleep(delay);
            let mut stream = stream;
            let _written = stream.write_all(
                format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").as_bytes(),
            );
        });

        (url, rx)
    }

    #[test]
    fn test_outbox_writes_report_and_verifiable_receipt() {
        let dir = TempDir::new().unwrap();
        let outbox = OutboxDelivery::new(dir.path().join("outbox"));
        let export = export();

        outbox.deliver(&export).unwrap();

        let report_path = outbox.dir().join(export.file_name());
        assert_eq!(fs::read(&report_path).unwrap(), export.csv);

        let result = verify_report(&receipt_path_for(&report_path)).unwrap();
        assert!(result.passed, "{}", result.format_cli());
    }

    #[test]
    fn test_outbox_failure_when_dir_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("outbox");
        fs::write(&blocker, b"not a directory").unwrap();

        let outbox = OutboxDelivery::new(&blocker);
        assert!(outbox.deliver(&export()).is_err());
    }

    #[test]
    fn test_webhook_posts_csv_with_token() {
        let (url, rx) = serve_once("HTTP/1.1 200 OK", Duration::ZERO);
        let webhook = WebhookDelivery::new(
            url,
            Some(SecretString::new("s3cret".into())),
            Duration::from_secs(5),
        )
        .unwrap();
        let export = export();

        webhook.deliver(&export).unwrap();

        let request = rx.recv().unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /reports"));
        assert!(request.contains("content-type: text/csv"));
        assert!(request.contains("authorization: bearer s3cret"));
        assert!(request.contains(&export.report_id.to_string()));
        assert!(request.contains("identifier,timestamp"));
    }

    #[test]
    fn test_webhook_non_success_status_fails() {
        let (url, _rx) = serve_once("HTTP/1.1 503 Service Unavailable", Duration::ZERO);
        let webhook = WebhookDelivery::new(url, None, Duration::from_secs(5)).unwrap();

        let err = webhook.deliver(&export()).unwrap_err();
        assert!(matches!(err, LatexGateError::DeliveryFailed(ref msg) if msg.contains("503")));
    }

    #[test]
    fn test_webhook_timeout_fails() {
        let (url, _rx) = serve_once("HTTP/1.1 200 OK", Duration::from_secs(3));
        let webhook = WebhookDelivery::new(url, None, Duration::from_millis(300)).unwrap();

        let err = webhook.deliver(&export()).unwrap_err();
        assert!(matches!(err, LatexGateError::DeliveryFailed(_)));
    }

    #[test]
    fn test_webhook_rejects_empty_url() {
        assert!(WebhookDelivery::new("  ", None, DEFAULT_DELIVERY_TIMEOUT).is_err());
    }

    fn email(port: u16) -> EmailDelivery {
        EmailDelivery::new(
            "localhost",
            port,
            "gate@example.edu",
            "Registrar <registrar@example.edu>",
            &SecretString::new("app-password".into()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn test_email_message_carries_csv_attachment() {
        let export = export();
        let message = email(DEFAULT_SMTP_PORT).message(&export).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Daily Student Usage Log"));
        assert!(raw.contains("To: Registrar <registrar@example.edu>"));
        assert!(raw.contains(EMAIL_ATTACHMENT_NAME));
        assert!(raw.contains("text/csv"));
        assert!(!raw.contains("app-password"));
    }

    #[test]
    fn test_email_rejects_bad_addresses() {
        let password = SecretString::new("pw".into());
        let err = EmailDelivery::new(
            "smtp.example.edu",
            DEFAULT_SMTP_PORT,
            "not an address",
            "registrar@example.edu",
            &password,
            DEFAULT_DELIVERY_TIMEOUT,
        )
        .unwrap_err();
        assert!(matches!(err, LatexGateError::Config(_)));
    }

    #[test]
    fn test_email_unreachable_server_is_delivery_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = email(port).deliver(&export()).unwrap_err();
        assert!(matches!(err, LatexGateError::DeliveryFailed(_)));
    }
}
