use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use vision_eye::publish::WebhookNotifier;
use vision_eye::{Detection, InspectionResult, Verdict};

fn fail_result() -> InspectionResult {
    InspectionResult {
        verdict: Verdict::Fail,
        defects: vec![Detection {
            x1: 4.0,
            y1: 4.0,
            x2: 32.0,
            y2: 48.0,
            confidence: 0.88,
            class_id: 2,
            class_name: "object_inside".to_string(),
        }],
        confidence: None,
        predicted_class: None,
        model_name: "scripted".to_string(),
        inference_time: 0.002,
    }
}

/// Serves one canned status per accepted connection, counting hits.
fn spawn_scripted_webhook(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind webhook");
    let addr = listener.local_addr().expect("webhook addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let thread_hits = Arc::clone(&hits);
    let join = std::thread::spawn(move || {
        for status in statuses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            drain_request(&mut stream);
            thread_hits.fetch_add(1, Ordering::SeqCst);
            let status_line = match status {
                200 => "HTTP/1.1 200 OK",
                400 => "HTTP/1.1 400 Bad Request",
                _ => "HTTP/1.1 500 Internal Server Error",
            };
            let _ = stream.write_all(
                format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .as_bytes(),
            );
        }
    });
    (format!("http://{}", addr), hits, join)
}

fn drain_request(stream: &mut TcpStream) {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(_) => return,
        }
    };
    let headers = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut received = data.len() - header_end - 4;
    while received < content_length {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => received += n,
            Err(_) => return,
        }
    }
}

fn fast_notifier(url: String) -> WebhookNotifier {
    WebhookNotifier::new(Some(url), "TEST_01".to_string())
        .with_backoff(Duration::from_millis(10), Duration::from_millis(20))
}

#[test]
fn transient_failures_are_retried_until_success() {
    let (url, hits, join) = spawn_scripted_webhook(vec![500, 500, 200]);
    let notifier = fast_notifier(url);

    notifier
        .send(&fail_result(), "memory://evidence/a.jpg")
        .expect("delivered on the third attempt");

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    join.join().expect("webhook thread");
}

#[test]
fn attempts_are_bounded_and_waits_grow_to_the_cap() {
    let (url, hits, join) = spawn_scripted_webhook(vec![500, 500, 500]);
    let notifier = WebhookNotifier::new(Some(url), "TEST_01".to_string())
        .with_backoff(Duration::from_millis(20), Duration::from_millis(30));

    let started = std::time::Instant::now();
    let err = notifier
        .send(&fail_result(), "memory://evidence/b.jpg")
        .expect_err("all attempts exhausted");

    // Two waits separate the three attempts: 20ms, then doubled but
    // capped at 30ms.
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(err.to_string().contains("after 3 attempts"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    join.join().expect("webhook thread");
}

#[test]
fn client_rejections_are_final() {
    let (url, hits, join) = spawn_scripted_webhook(vec![400]);
    let notifier = fast_notifier(url);

    let err = notifier
        .send(&fail_result(), "memory://evidence/c.jpg")
        .expect_err("4xx is not retried");

    assert!(err.to_string().contains("status 400"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    join.join().expect("webhook thread");
}

#[test]
fn unreachable_webhook_exhausts_attempts() {
    // Bind and immediately drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr")
    };
    let notifier = WebhookNotifier::new(Some(format!("http://{}", addr)), "TEST_01".to_string())
        .with_attempts(2)
        .with_backoff(Duration::from_millis(5), Duration::from_millis(10));

    let err = notifier
        .send(&fail_result(), "memory://evidence/d.jpg")
        .expect_err("nothing is listening");

    assert!(err.to_string().contains("after 2 attempts"));
}
