use portage_core::crypto::{Cipher, SecurityMode};
use portage_core::frame::{fragment, reassemble, Message};

/// Fragmenting an oversized payload and reassembling in order reproduces
/// it exactly.
#[test]
fn test_fragment_reassemble_reproduces_payload() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let frames = fragment(&payload, 64, 7).unwrap();

    assert_eq!(frames.len(), 16); // ceil(1000 / 64)
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.number, i as u32 + 1);
        assert_eq!(frame.amount, 16);
        assert_eq!(frame.box_id, 7);
    }

    let back = reassemble(&frames).unwrap();
    assert_eq!(back.as_ref(), payload.as_slice());
}

#[test]
fn test_message_encoding_round_trips() {
    let frames = fragment(b"round trip payload", 8, 3).unwrap();
    for frame in frames {
        let encoded = frame.to_bytes();
        let decoded = Message::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }
}

/// Encryption adds exactly the advertised overhead per mode, and decrypts
/// back to the input.
#[test]
fn test_cipher_overhead_is_exact_per_mode() {
    let modes = [
        SecurityMode::None,
        SecurityMode::Sym128Low,
        SecurityMode::Sym256Low,
        SecurityMode::Sym128High,
        SecurityMode::Sym256High,
    ];
    let plaintext = b"the quick brown fox";

    for mode in modes {
        let cipher = Cipher::new(mode, "integration passphrase");
        let ciphertext = cipher.encrypt(plaintext).unwrap();
        assert_eq!(
            ciphertext.len(),
            plaintext.len() + mode.overhead(),
            "overhead mismatch for {mode:?}"
        );
        assert_eq!(cipher.decrypt(&ciphertext).unwrap(), plaintext);
    }
}

#[test]
fn test_high_mode_rejects_wrong_passphrase() {
    let sender = Cipher::new(SecurityMode::Sym256High, "right");
    let receiver = Cipher::new(SecurityMode::Sym256High, "wrong");
    let ciphertext = sender.encrypt(b"secret").unwrap();
    assert!(receiver.decrypt(&ciphertext).is_err());
}
