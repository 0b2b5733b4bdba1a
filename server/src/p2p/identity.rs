use libp2p::identity;
use libp2p::PeerId;
use std::fs;
use std::path::Path;

use crate::error::BrokerError;

/// Load or generate this node's libp2p Ed25519 keypair.
///
/// The keypair is stored as a 32-byte Ed25519 seed at `{data_dir}/p2p_identity.key`
/// so the PeerId survives restarts.
pub fn node_keypair(data_dir: &str) -> Result<identity::Keypair, BrokerError> {
    let key_path = Path::new(data_dir).join("p2p_identity.key");

    if key_path.exists() {
        let seed = fs::read(&key_path).map_err(|e| {
            BrokerError::Transport(format!("failed to read {}: {}", key_path.display(), e))
        })?;
        if seed.len() != 32 {
            return Err(BrokerError::Transport(format!(
                "{} must be 32 bytes (Ed25519 seed), found {} bytes",
                key_path.display(),
                seed.len()
            )));
        }
        let keypair = identity::Keypair::ed25519_from_bytes(seed)
            .map_err(|e| BrokerError::Transport(format!("invalid Ed25519 seed: {}", e)))?;
        tracing::info!(
            "Node PeerId: {} (loaded from {})",
            PeerId::from(keypair.public()),
            key_path.display()
        );
        return Ok(keypair);
    }

    let keypair = identity::Keypair::generate_ed25519();
    let ed25519 = keypair
        .clone()
        .try_into_ed25519()
        .map_err(|e| BrokerError::Transport(e.to_string()))?;
    // to_bytes() is seed || public key; only the seed is persisted.
    let full = ed25519.to_bytes();

    let write = fs::create_dir_all(data_dir).and_then(|_| fs::write(&key_path, &full[..32]));
    write.map_err(|e| {
        BrokerError::Transport(format!("failed to write {}: {}", key_path.display(), e))
    })?;

    tracing::info!(
        "Node PeerId: {} (generated, saved to {})",
        PeerId::from(keypair.public()),
        key_path.display()
    );
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let first = node_keypair(data_dir).unwrap();
        let second = node_keypair(data_dir).unwrap();
        assert_eq!(PeerId::from(first.public()), PeerId::from(second.public()));
    }
}
