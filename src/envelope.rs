use super::{Error, block::IV_LEN};

/// The `<ivHex>:<cipherHex>` string form shared by wrapped keys and secret diary text.
#[derive(Clone, Debug)]
pub(crate) struct Envelope {
	pub(crate) iv: [u8; IV_LEN],
	pub(crate) ciphertext: Vec<u8>,
}

impl Envelope {
	pub(crate) fn new(iv: [u8; IV_LEN], ciphertext: Vec<u8>) -> Self {
		Self { iv, ciphertext }
	}

	pub(crate) fn encode(&self) -> String {
		let mut s = String::with_capacity((IV_LEN + self.ciphertext.len()) * 2 + 1);

		s.push_str(&hex::encode(self.iv));
		s.push(':');
		s.push_str(&hex::encode(&self.ciphertext));

		s
	}
}

impl TryFrom<&str> for Envelope {
	type Error = Error;

	fn try_from(s: &str) -> Result<Self, Self::Error> {
		let Some((iv_hex, ct_hex)) = s.split_once(':') else {
			return Err(Error::key_format("missing ':' separator"));
		};

		let mut iv = [0u8; IV_LEN];
		hex::decode_to_slice(iv_hex, &mut iv)
			.map_err(|e| Error::key_format(format!("bad iv: {e}")))?;

		let ciphertext =
			hex::decode(ct_hex).map_err(|e| Error::key_format(format!("bad ciphertext: {e}")))?;

		Ok(Self { iv, ciphertext })
	}
}
