//! Layered encryption sequencing.
//!
//! The stack defines how rounds are applied (innermost first) and removed
//! (outermost first). Two rounds use keys derived from the master key; a
//! third, outermost round uses a key stretched from the caller's password,
//! so the password acts as a second factor on top of the master key.
//!
//! ```text
//! seal:  plaintext ─► [1 MachinePrimary] ─► [2 MachineSecondary] ─► [3 Password] ─► ciphertext
//! peel:  ciphertext ─► verify+open 3 ─► verify+open 2 ─► verify+open 1 ─► plaintext
//! ```
//!
//! Every round's tag is verified before that round is opened. A wrong
//! password therefore surfaces as [`StrataError::Integrity`] on round 3,
//! never as garbage plaintext.

use tracing::debug;

use crate::codec::{self, decode, encode};
use crate::crypto;
use crate::envelope::LayeredEnvelope;
use crate::error::{Result, StrataError};
use crate::keys::{self, purpose, DerivedKey, MasterKey};

/// The rounds of a layered envelope. The discriminant is the `N` of the
/// envelope's `ivN`/`hmacN` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    /// Round 1, innermost: master-derived key `layer-1`.
    MachinePrimary = 1,
    /// Round 2: master-derived key `layer-2`.
    MachineSecondary = 2,
    /// Round 3, outermost: PBKDF2 key from the password and a fresh salt.
    Password = 3,
}

impl Layer {
    /// Encryption order. Decoding walks this slice in reverse.
    pub const ORDER: [Layer; 3] = [Layer::MachinePrimary, Layer::MachineSecondary, Layer::Password];

    /// The rounds applied with or without a password.
    pub fn rounds(with_password: bool) -> &'static [Layer] {
        if with_password {
            &Self::ORDER
        } else {
            &Self::ORDER[..2]
        }
    }
}

/// Password, salt and work factor for the outermost round.
struct PasswordContext<'a> {
    password: &'a str,
    salt: &'a [u8],
    iterations: u32,
}

fn round_key(
    master: &MasterKey,
    layer: Layer,
    password: Option<&PasswordContext<'_>>,
) -> Result<DerivedKey> {
    match layer {
        Layer::MachinePrimary => keys::derive_key(master.as_bytes(), purpose::LAYER_1),
        Layer::MachineSecondary => keys::derive_key(master.as_bytes(), purpose::LAYER_2),
        Layer::Password => {
            let ctx = password.ok_or(StrataError::MissingPassword)?;
            keys::derive_password_key(ctx.password, ctx.salt, ctx.iterations)
        }
    }
}

/// Seal `plaintext` under two machine rounds, plus a password round if a
/// password is given.
pub(crate) fn seal(
    master: &MasterKey,
    plaintext: &[u8],
    password: Option<&str>,
    iterations: u32,
) -> Result<LayeredEnvelope> {
    let salt = password.map(|_| crypto::generate_salt()).transpose()?;
    let ctx = password.zip(salt.as_ref()).map(|(password, salt)| PasswordContext {
        password,
        salt,
        iterations,
    });

    let layers = Layer::rounds(ctx.is_some());
    let mut envelope = LayeredEnvelope {
        ciphertext: String::new(),
        layers: layers.len() as u8,
        iv1: String::new(),
        iv2: String::new(),
        hmac1: String::new(),
        hmac2: String::new(),
        salt: salt.as_ref().map(|s| encode(s)),
        iv3: None,
        hmac3: None,
    };

    let mut current = plaintext.to_vec();
    for &layer in layers {
        let key = round_key(master, layer, ctx.as_ref())?;
        let round = codec::seal_round(key.as_bytes(), &current)?;
        let (iv, hmac) = (encode(&round.iv), encode(&round.hmac));
        match layer {
            Layer::MachinePrimary => (envelope.iv1, envelope.hmac1) = (iv, hmac),
            Layer::MachineSecondary => (envelope.iv2, envelope.hmac2) = (iv, hmac),
            Layer::Password => (envelope.iv3, envelope.hmac3) = (Some(iv), Some(hmac)),
        }
        current = round.ciphertext;
    }
    envelope.ciphertext = encode(&current);

    debug!(layers = envelope.layers, "sealed layered envelope");
    Ok(envelope)
}

/// Peel every round of `envelope`, outermost first.
pub(crate) fn peel(
    master: &MasterKey,
    envelope: &LayeredEnvelope,
    password: Option<&str>,
    iterations: u32,
) -> Result<Vec<u8>> {
    if envelope.has_password_layer() && password.is_none() {
        return Err(StrataError::MissingPassword);
    }
    envelope.validate()?;

    let salt = envelope.salt.as_deref().map(decode).transpose()?;
    let ctx = match (envelope.has_password_layer(), password, salt.as_deref()) {
        (true, Some(password), Some(salt)) => Some(PasswordContext {
            password,
            salt,
            iterations,
        }),
        _ => None,
    };

    let mut current = decode(&envelope.ciphertext)?;
    for &layer in Layer::rounds(envelope.has_password_layer()).iter().rev() {
        let (iv, hmac) = envelope.round(layer)?;
        let key = round_key(master, layer, ctx.as_ref())?;
        current = codec::open_round(key.as_bytes(), &decode(iv)?, &current, &decode(hmac)?)?;
    }

    debug!(layers = envelope.layers, "peeled layered envelope");
    Ok(current)
}

pub(crate) fn seal_str(
    master: &MasterKey,
    plaintext: &str,
    password: Option<&str>,
    iterations: u32,
) -> Result<LayeredEnvelope> {
    seal(master, plaintext.as_bytes(), password, iterations)
}

pub(crate) fn peel_str(
    master: &MasterKey,
    envelope: &LayeredEnvelope,
    password: Option<&str>,
    iterations: u32,
) -> Result<String> {
    String::from_utf8(peel(master, envelope, password, iterations)?)
        .map_err(|_| StrataError::Decryption)
}
