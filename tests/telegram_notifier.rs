use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;

use tempfile::tempdir;

use fall_sentinel::notify::{discover_chat_id, Notification, Notifier, TelegramConfig, TelegramNotifier};

struct Captured {
    request_line: String,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl Captured {
    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Serve one canned reply per connection, in order.
fn mock_bot_api(replies: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let base = format!("http://{}", listener.local_addr().unwrap());
    let handle = std::thread::spawn(move || {
        let mut captured = Vec::new();
        for (status, reply) in replies {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            let mut content_type = None;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    match name.trim().to_ascii_lowercase().as_str() {
                        "content-length" => content_length = value.trim().parse().unwrap(),
                        "content-type" => content_type = Some(value.trim().to_string()),
                        _ => {}
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();

            let reason = if status == 200 { "OK" } else { "Bad Request" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                reply.len(),
                reply
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();

            captured.push(Captured {
                request_line: request_line.trim_end().to_string(),
                content_type,
                body,
            });
        }
        captured
    });
    (base, handle)
}

const OK: &str = r#"{"ok":true,"result":{}}"#;

#[test]
fn sends_text_then_photo() {
    let (base, server) = mock_bot_api(vec![(200, OK), (200, OK)]);
    let dir = tempdir().unwrap();
    let photo = dir.path().join("fall_snapshot_20240101_120000.jpg");
    std::fs::write(&photo, b"\xff\xd8jpegbytes").unwrap();

    let mut notifier =
        TelegramNotifier::new(TelegramConfig::new("123:abc", "42").with_api_base(&base)).unwrap();
    notifier
        .notify(&Notification::with_photo("Fall detected", &photo))
        .unwrap();

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 2);

    assert!(requests[0].request_line.starts_with("POST /bot123:abc/sendMessage "));
    let form = requests[0].body_text();
    assert!(form.contains("chat_id=42"));
    assert!(form.contains("text=Fall+detected") || form.contains("text=Fall%20detected"));

    assert!(requests[1].request_line.starts_with("POST /bot123:abc/sendPhoto "));
    assert!(requests[1]
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));
    let upload = requests[1].body_text();
    assert!(upload.contains(
        "name=\"photo\"; filename=\"fall_snapshot_20240101_120000.jpg\""
    ));
    assert!(upload.contains("name=\"caption\"\r\n\r\nfall_snapshot_20240101_120000.jpg"));
    assert!(upload.contains("jpegbytes"));
}

#[test]
fn missing_attachment_sends_text_only() {
    let (base, server) = mock_bot_api(vec![(200, OK)]);
    let mut notifier =
        TelegramNotifier::new(TelegramConfig::new("123:abc", "42").with_api_base(&base)).unwrap();
    notifier
        .notify(&Notification::with_video("done", "/nonexistent/clip.mp4"))
        .unwrap();

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].request_line.contains("/sendMessage"));
}

#[test]
fn rejected_request_reports_telegram_description() {
    let (base, server) = mock_bot_api(vec![(
        400,
        r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
    )]);
    let mut notifier =
        TelegramNotifier::new(TelegramConfig::new("123:abc", "7").with_api_base(&base)).unwrap();

    let err = notifier.notify(&Notification::text("hello")).unwrap_err();
    server.join().unwrap();
    assert!(err.to_string().contains("chat not found"));
}

#[test]
fn discovers_chat_id_from_latest_message() {
    let (base, server) = mock_bot_api(vec![(
        200,
        r#"{"ok":true,"result":[
            {"update_id":10,"message":{"message_id":1,"chat":{"id":555,"type":"private"},"text":"/start"}},
            {"update_id":11,"message":{"message_id":2,"chat":{"id":-100777,"type":"group"},"text":"hi"}}
        ]}"#,
    )]);

    let chat_id = discover_chat_id(&base, "123:abc").unwrap();
    let requests = server.join().unwrap();

    assert_eq!(chat_id.as_deref(), Some("-100777"));
    assert!(requests[0].request_line.starts_with("GET /bot123:abc/getUpdates "));
}

#[test]
fn no_updates_yields_none() {
    let (base, server) = mock_bot_api(vec![(200, r#"{"ok":true,"result":[]}"#)]);
    assert_eq!(discover_chat_id(&base, "123:abc").unwrap(), None);
    server.join().unwrap();
}
