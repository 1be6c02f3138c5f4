use super::*;

/// Largest accepted envelope body.
pub const MAX_ENVELOPE_LEN: usize = 16 * 1024 * 1024;

/// One message on a control connection, prefixed on the wire by its
/// big-endian `u32` body length. A call and its outcome carry the same
/// `call_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Call {
        call_id: u32,
        request: ControlRequest,
    },
    Reply {
        call_id: u32,
        response: ControlResponse,
    },
    /// The server could not complete the call.
    Failure { call_id: u32, message: String },
}

impl Envelope {
    pub fn call_id(&self) -> u32 {
        match self {
            Envelope::Call { call_id, .. }
            | Envelope::Reply { call_id, .. }
            | Envelope::Failure { call_id, .. } => *call_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).context("serialize envelope failed")?;
        ensure!(
            body.len() <= MAX_ENVELOPE_LEN,
            "envelope body of {} bytes exceeds {} bytes",
            body.len(),
            MAX_ENVELOPE_LEN
        );
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        bincode::deserialize(body).context("malformed envelope")
    }

    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let body_len = u32::from_be_bytes(len_buf) as usize;
        if body_len > MAX_ENVELOPE_LEN {
            bail!(
                "envelope body of {} bytes exceeds {} bytes",
                body_len,
                MAX_ENVELOPE_LEN
            );
        }
        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).await?;
        Self::decode(&body)
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()?).await?;
        writer.flush().await?;
        Ok(())
    }
}
