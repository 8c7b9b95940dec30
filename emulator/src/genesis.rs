//! Generate the shared founding state of a ledger.
//!
//! A [Genesis] lists every validator (in declaration order) along with its public key and
//! network address. It is produced together with the [KeyMaterial] of each validator, and the
//! two are never regenerated independently: any regeneration yields an entirely new ledger
//! identity.

use crate::{
    topology::{NodeSpec, Role},
    utils::{from_hex, hex},
    Error,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    net::IpAddr,
};

/// Length of an ed25519 public key.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an ed25519 private key.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Length of a genesis digest.
pub const DIGEST_LENGTH: usize = 32;

/// Ed25519 public key of a validator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        hex(&key.0)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let raw = from_hex(&value)
            .and_then(|raw| <[u8; PUBLIC_KEY_LENGTH]>::try_from(raw).ok())
            .ok_or(Error::InvalidKey)?;
        ed25519_consensus::VerificationKey::try_from(raw).map_err(|_| Error::InvalidKey)?;
        Ok(Self(raw))
    }
}

/// Ed25519 private key of a validator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrivateKey([u8; PRIVATE_KEY_LENGTH]);

impl PrivateKey {
    /// Derive the matching [PublicKey].
    pub fn public_key(&self) -> PublicKey {
        let signer = ed25519_consensus::SigningKey::from(self.0);
        PublicKey(signer.verification_key().to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

impl From<PrivateKey> for String {
    fn from(key: PrivateKey) -> Self {
        hex(&key.0)
    }
}

impl TryFrom<String> for PrivateKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        from_hex(&value)
            .and_then(|raw| <[u8; PRIVATE_KEY_LENGTH]>::try_from(raw).ok())
            .map(Self)
            .ok_or(Error::InvalidKey)
    }
}

/// Key pair held by a single validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyMaterial {
    /// Generate a new key pair from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, Error> {
        let mut seed = [0u8; PRIVATE_KEY_LENGTH];
        rng.try_fill_bytes(&mut seed)
            .map_err(|err| Error::GenesisGenerationFailed(format!("key generation: {err}")))?;
        let private_key = PrivateKey(seed);
        Ok(Self {
            public_key: private_key.public_key(),
            private_key,
        })
    }
}

/// Fixed parameters of a ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    pub chain_id: String,
    pub protocol_version: u64,
    pub epoch_duration_ms: u64,
    pub reference_gas_price: u64,
    /// Fund a faucet account at genesis.
    pub with_faucet: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            chain_id: "emulator".to_string(),
            protocol_version: 1,
            epoch_duration_ms: 60_000,
            reference_gas_price: 1_000,
            with_faucet: true,
        }
    }
}

/// A validator as recorded in the genesis bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub name: String,
    pub public_key: PublicKey,
    pub address: IpAddr,
    pub p2p_port: u16,
}

/// Shared founding state of a ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub parameters: Parameters,
    pub validators: Vec<Validator>,
    /// Creation time (milliseconds since the UNIX epoch).
    pub created_at: u64,
}

impl Genesis {
    /// Returns the names of all validators, in genesis order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.validators.iter().map(|v| v.name.as_str())
    }

    /// Returns the validator called `name`, if any.
    pub fn validator(&self, name: &str) -> Option<&Validator> {
        self.validators.iter().find(|v| v.name == name)
    }

    /// Returns true if the genesis validator set is exactly `names`.
    pub fn matches<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        let expected: HashSet<&str> = names.into_iter().collect();
        let actual: HashSet<&str> = self.names().collect();
        expected.len() == self.validators.len() && expected == actual
    }

    /// Digest over the canonical encoding of the bundle.
    pub fn digest(&self) -> [u8; DIGEST_LENGTH] {
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }

        let mut hasher = Sha256::new();
        field(&mut hasher, self.parameters.chain_id.as_bytes());
        hasher.update(self.parameters.protocol_version.to_be_bytes());
        hasher.update(self.parameters.epoch_duration_ms.to_be_bytes());
        hasher.update(self.parameters.reference_gas_price.to_be_bytes());
        hasher.update([self.parameters.with_faucet as u8]);
        hasher.update(self.created_at.to_be_bytes());
        hasher.update((self.validators.len() as u64).to_be_bytes());
        for validator in &self.validators {
            field(&mut hasher, validator.name.as_bytes());
            hasher.update(validator.public_key.as_bytes());
            field(&mut hasher, validator.address.to_string().as_bytes());
            hasher.update(validator.p2p_port.to_be_bytes());
        }
        let mut digest = [0u8; DIGEST_LENGTH];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }
}

/// Produces a [Genesis] and the [KeyMaterial] of each validator.
#[derive(Clone, Debug, Default)]
pub struct Generator {
    parameters: Parameters,
}

impl Generator {
    pub fn new(parameters: Parameters) -> Self {
        Self { parameters }
    }

    /// Generate a genesis bundle over `validators` (kept in the order provided).
    ///
    /// Either the complete bundle and all key material are returned, or nothing is.
    pub fn generate<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        validators: &[&NodeSpec],
        created_at: u64,
    ) -> Result<(Genesis, BTreeMap<String, KeyMaterial>), Error> {
        if validators.is_empty() {
            return Err(Error::GenesisGenerationFailed(
                "validator set is empty".to_string(),
            ));
        }

        let mut keys = BTreeMap::new();
        let mut entries = Vec::with_capacity(validators.len());
        for spec in validators {
            if spec.role != Role::Validator {
                return Err(Error::GenesisGenerationFailed(format!(
                    "{} is a {}, not a validator",
                    spec.name, spec.role
                )));
            }
            if keys.contains_key(&spec.name) {
                return Err(Error::GenesisGenerationFailed(format!(
                    "validator {} listed twice",
                    spec.name
                )));
            }
            let material = KeyMaterial::generate(rng)?;
            entries.push(Validator {
                name: spec.name.clone(),
                public_key: material.public_key,
                address: spec.address,
                p2p_port: spec.p2p_port,
            });
            keys.insert(spec.name.clone(), material);
        }

        let genesis = Genesis {
            parameters: self.parameters.clone(),
            validators: entries,
            created_at,
        };
        Ok((genesis, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::net::Ipv4Addr;

    fn validator(name: &str, ordinal: u8) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            role: Role::Validator,
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, ordinal + 1)),
            p2p_port: 2001 + ordinal as u16 * 10,
            rpc_port: None,
            metrics_port: 9184,
            link: None,
        }
    }

    /// RNG whose entropy source always fails.
    struct Broken;

    impl RngCore for Broken {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, _: &mut [u8]) {}
        fn try_fill_bytes(&mut self, _: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy unavailable"))
        }
    }

    impl CryptoRng for Broken {}

    #[test]
    fn test_generate() {
        let specs: Vec<NodeSpec> = (0..4).map(|i| validator(&format!("v{i}"), i)).collect();
        let refs: Vec<&NodeSpec> = specs.iter().collect();
        let mut rng = StdRng::seed_from_u64(0);
        let (genesis, keys) = Generator::default().generate(&mut rng, &refs, 7).unwrap();

        assert_eq!(genesis.validators.len(), 4);
        assert_eq!(keys.len(), 4);
        assert_eq!(genesis.names().collect::<Vec<_>>(), ["v0", "v1", "v2", "v3"]);
        assert!(genesis.matches(["v3", "v2", "v1", "v0"]));
        assert!(!genesis.matches(["v0", "v1", "v2"]));
        for validator in &genesis.validators {
            let material = &keys[&validator.name];
            assert_eq!(material.public_key, validator.public_key);
            assert_eq!(material.private_key.public_key(), validator.public_key);
        }

        // Keys are pairwise distinct
        let unique: HashSet<_> = genesis.validators.iter().map(|v| v.public_key).collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_generate_single() {
        let spec = validator("solo", 0);
        let mut rng = StdRng::seed_from_u64(1);
        let (genesis, keys) = Generator::default()
            .generate(&mut rng, &[&spec], 0)
            .unwrap();
        assert!(genesis.matches(["solo"]));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_generate_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            Generator::default().generate(&mut rng, &[], 0),
            Err(Error::GenesisGenerationFailed(_))
        ));
    }

    #[test]
    fn test_generate_rejects_non_validator() {
        let mut spec = validator("gw", 0);
        spec.role = Role::Gateway;
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            Generator::default().generate(&mut rng, &[&spec], 0),
            Err(Error::GenesisGenerationFailed(_))
        ));
    }

    #[test]
    fn test_generate_key_failure() {
        let specs = [validator("v0", 0), validator("v1", 1)];
        let refs: Vec<&NodeSpec> = specs.iter().collect();
        assert!(matches!(
            Generator::default().generate(&mut Broken, &refs, 0),
            Err(Error::GenesisGenerationFailed(_))
        ));
    }

    #[test]
    fn test_digest_deterministic() {
        let specs = [validator("v0", 0), validator("v1", 1)];
        let refs: Vec<&NodeSpec> = specs.iter().collect();
        let generator = Generator::default();
        let (a, _) = generator
            .generate(&mut StdRng::seed_from_u64(3), &refs, 10)
            .unwrap();
        let (b, _) = generator
            .generate(&mut StdRng::seed_from_u64(3), &refs, 10)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());

        // Fresh key material yields a different ledger identity
        let (c, _) = generator
            .generate(&mut StdRng::seed_from_u64(4), &refs, 10)
            .unwrap();
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_genesis_yaml() {
        let specs = [validator("v0", 0), validator("v1", 1)];
        let refs: Vec<&NodeSpec> = specs.iter().collect();
        let (genesis, keys) = Generator::default()
            .generate(&mut StdRng::seed_from_u64(5), &refs, 42)
            .unwrap();

        let yaml = serde_yaml::to_string(&genesis).unwrap();
        let decoded: Genesis = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(decoded.digest(), genesis.digest());

        let yaml = serde_yaml::to_string(&keys["v0"]).unwrap();
        let decoded: KeyMaterial = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(decoded, keys["v0"]);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(PublicKey::try_from("abcd".to_string()).is_err());
        assert!(PrivateKey::try_from("zz".repeat(32)).is_err());
        assert_eq!(format!("{:?}", PrivateKey([1; 32])), "PrivateKey(..)");
    }
}
