// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `keys.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[test]
    fn test_generated_key_pair_formats() {
        let pair = generate_key_pair("kt-tunnel-shadow-abcde").unwrap();

        assert!(pair.public_key.starts_with("ssh-ed25519 "));
        assert!(pair.public_key.ends_with(" kt-tunnel-shadow-abcde"));
        assert!(pair.private_key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let first = generate_key_pair("a").unwrap();
        let second = generate_key_pair("a").unwrap();
        assert_ne!(first.public_key, second.public_key);
    }

    #[test]
    fn test_private_key_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let pair = generate_key_pair("shadow").unwrap();

        let path = write_private_key(&dir.path().join("pk"), "shadow", &pair.private_key).unwrap();
        assert_eq!(path, private_key_path(&dir.path().join("pk"), "shadow"));
        assert!(russh_keys::load_secret_key(&path, None).is_ok());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_remove_private_key_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.key");
        assert!(remove_private_key(&path).is_ok());

        std::fs::write(&path, "x").unwrap();
        remove_private_key(&path).unwrap();
        assert!(!path.exists());
    }
}
