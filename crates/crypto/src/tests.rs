use super::*;

#[test]
fn seal_then_open_round_trips() {
    let salt = Salt::random();
    let key = derive_key("correct horse battery staple", &salt, KdfParams::default()).unwrap();

    let sealed = seal(&key, b"page:42", b"hello world").unwrap();
    let opened = open(&key, b"page:42", &sealed.nonce, &sealed.ciphertext).unwrap();

    assert_eq!(opened, b"hello world");
}

#[test]
fn open_rejects_wrong_key() {
    let salt = Salt::random();
    let key_a = derive_key("passphrase-a", &salt, KdfParams::default()).unwrap();
    let key_b = derive_key("passphrase-b", &salt, KdfParams::default()).unwrap();

    let sealed = seal(&key_a, b"page:1", b"secret payload").unwrap();
    let result = open(&key_b, b"page:1", &sealed.nonce, &sealed.ciphertext);

    assert!(matches!(result, Err(DbError::AuthError(_))));
}

#[test]
fn open_rejects_mismatched_aad() {
    let salt = Salt::random();
    let key = derive_key("passphrase", &salt, KdfParams::default()).unwrap();

    let sealed = seal(&key, b"page:1", b"payload").unwrap();
    let result = open(&key, b"page:2", &sealed.nonce, &sealed.ciphertext);

    assert!(matches!(result, Err(DbError::AuthError(_))));
}

#[test]
fn open_rejects_tampered_ciphertext() {
    let salt = Salt::random();
    let key = derive_key("passphrase", &salt, KdfParams::default()).unwrap();

    let mut sealed = seal(&key, b"lsn:7", b"durable bytes").unwrap();
    let last = sealed.ciphertext.len() - 1;
    sealed.ciphertext[last] ^= 0xFF;

    let result = open(&key, b"lsn:7", &sealed.nonce, &sealed.ciphertext);
    assert!(matches!(result, Err(DbError::AuthError(_))));
}

#[test]
fn same_key_and_salt_derive_deterministically() {
    let salt = Salt::random();
    let key_1 = derive_key("passphrase", &salt, KdfParams::default()).unwrap();
    let key_2 = derive_key("passphrase", &salt, KdfParams::default()).unwrap();

    assert_eq!(key_1.as_bytes(), key_2.as_bytes());
}

#[test]
fn different_salts_derive_different_keys() {
    let key_1 = derive_key("passphrase", &Salt::random(), KdfParams::default()).unwrap();
    let key_2 = derive_key("passphrase", &Salt::random(), KdfParams::default()).unwrap();

    assert_ne!(key_1.as_bytes(), key_2.as_bytes());
}

#[test]
fn zeroize_buffer_clears_bytes() {
    let mut buf = vec![0xAB; 32];
    zeroize_buffer(&mut buf);
    assert!(buf.iter().all(|&b| b == 0));
}
