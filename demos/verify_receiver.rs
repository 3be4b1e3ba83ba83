use bulk_webhook::{compute_signature, verify_webhook_request, SIGNATURE_HEADER};

fn main() {
    let payload = br#"[{"order":"SO-0001"}]"#;
    let signature = compute_signature(b"supersecret", payload).unwrap_or_default();

    let headers = vec![
        (SIGNATURE_HEADER, signature.as_str()),
        ("Content-Type", "application/json"),
    ];

    let result = verify_webhook_request(headers.iter().map(|(k, v)| (*k, *v)), payload, b"supersecret");
    println!("{result:?}");
}
