use chrono::Duration;
use lcg_runtime::GuardError;
use lcg_schemas::OtpPurpose;
use lcg_testkit::Harness;

const IP: &str = "203.0.113.7";

#[tokio::test]
async fn a_code_verifies_exactly_once() {
    let h = Harness::new();
    h.codes.push("482913");
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::ProfileChange, IP)
        .await
        .unwrap();

    let first = h
        .rt
        .otp
        .verify("ana@example.com", "482913", OtpPurpose::ProfileChange)
        .await
        .unwrap();
    let second = h
        .rt
        .otp
        .verify("ana@example.com", "482913", OtpPurpose::ProfileChange)
        .await
        .unwrap();
    assert!(first);
    assert!(!second);
}

#[tokio::test]
async fn concurrent_verifies_of_one_code_succeed_once() {
    let h = Harness::new();
    h.codes.push("111222");
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::PasswordReset, IP)
        .await
        .unwrap();

    let otp = h.rt.otp.clone();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let otp = otp.clone();
            tokio::spawn(async move {
                otp.verify("ana@example.com", "111222", OtpPurpose::PasswordReset)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut wins = 0;
    for t in tasks {
        if t.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn purpose_and_subject_are_part_of_the_match() {
    let h = Harness::new();
    h.codes.push("555666");
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::AccountVerification, IP)
        .await
        .unwrap();

    assert!(!h
        .rt
        .otp
        .verify("ana@example.com", "555666", OtpPurpose::PasswordReset)
        .await
        .unwrap());
    assert!(!h
        .rt
        .otp
        .verify("laura@example.com", "555666", OtpPurpose::AccountVerification)
        .await
        .unwrap());
    // Subject comparison ignores case and padding.
    assert!(h
        .rt
        .otp
        .verify("  ANA@example.com ", "555666", OtpPurpose::AccountVerification)
        .await
        .unwrap());
}

#[tokio::test]
async fn expired_codes_are_rejected() {
    let h = Harness::new();
    h.codes.push("909090");
    let issued = h
        .rt
        .otp
        .issue("ana@example.com", OtpPurpose::ProfileChange, IP)
        .await
        .unwrap();
    assert_eq!(issued.expires_at, h.now() + Duration::minutes(15));

    h.clock.advance(Duration::minutes(15));
    assert!(!h
        .rt
        .otp
        .verify("ana@example.com", "909090", OtpPurpose::ProfileChange)
        .await
        .unwrap());
}

#[tokio::test]
async fn malformed_codes_never_match() {
    let h = Harness::new();
    h.codes.push("123456");
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::ProfileChange, IP)
        .await
        .unwrap();

    for bad in ["", "12345", "1234567", "12a456", "      "] {
        assert!(!h
            .rt
            .otp
            .verify("ana@example.com", bad, OtpPurpose::ProfileChange)
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn successful_verify_revokes_older_codes() {
    let h = Harness::new();
    h.codes.push("100001");
    h.codes.push("100002");
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::ProfileChange, IP)
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(1));
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::ProfileChange, IP)
        .await
        .unwrap();

    assert!(h
        .rt
        .otp
        .verify("ana@example.com", "100002", OtpPurpose::ProfileChange)
        .await
        .unwrap());
    assert!(!h
        .rt
        .otp
        .verify("ana@example.com", "100001", OtpPurpose::ProfileChange)
        .await
        .unwrap());
}

#[tokio::test]
async fn issuance_is_rate_limited_per_purpose_and_ip() {
    let h = Harness::new();
    for _ in 0..5 {
        h.rt
            .otp
            .issue("ana@example.com", OtpPurpose::PasswordReset, IP)
            .await
            .unwrap();
    }
    let err = h
        .rt
        .otp
        .issue("ana@example.com", OtpPurpose::PasswordReset, IP)
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::RateLimited { .. }), "got {err:?}");

    // Other purposes and other addresses have their own buckets.
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::ProfileChange, IP)
        .await
        .unwrap();
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::PasswordReset, "198.51.100.4")
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(16));
    h.rt
        .otp
        .issue("ana@example.com", OtpPurpose::PasswordReset, IP)
        .await
        .unwrap();
}

#[tokio::test]
async fn send_code_queues_a_localized_email() {
    let h = Harness::new();
    let receipt = h
        .rt
        .otp
        .send_code(
            "ana@example.com",
            lcg_schemas::Locale::Es,
            OtpPurpose::AccountVerification,
            IP,
        )
        .await
        .unwrap();
    assert!(receipt.queued);

    let queued = h.store.outbox_in_category("otp");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].email.to, "ana@example.com");
    assert!(h.mailer.sent().is_empty(), "delivery happens in the dispatcher");
}

#[tokio::test]
async fn malformed_subject_is_a_validation_error() {
    let h = Harness::new();
    let err = h
        .rt
        .otp
        .issue("not-an-address", OtpPurpose::PasswordReset, IP)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}
