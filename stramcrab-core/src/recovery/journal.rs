use super::*;

const LENGTH_PREFIX: usize = 4;

/// Append side of the journal.
///
/// Records are framed as a big-endian `u32` length followed by the record
/// bytes. Data is durable only after [`flush`](Self::flush).
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl LogWriter {
    pub(crate) fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("failed to create log {}", path.display()))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let bytes = bincode::serialize(record).context("serialize log record failed")?;
        self.append_bytes(&bytes)
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| anyhow!("log record of {} bytes is too large", bytes.len()))?;
        self.out
            .write_all(&len.to_be_bytes())
            .and_then(|()| self.out.write_all(bytes))
            .with_context(|| format!("append to {} failed", self.path.display()))
    }

    /// Push buffered records to the device.
    pub fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .and_then(|()| self.out.get_ref().sync_data())
            .with_context(|| format!("flush of {} failed", self.path.display()))
    }

    /// Flush and close.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        tracing::debug!("closing {}", self.path.display());
        Ok(())
    }
}

/// Read side of the journal.
///
/// A record cut short by a crash mid-append ends the stream; everything
/// before it is returned.
pub struct LogReader {
    source: Box<dyn Read + Send>,
    origin: String,
}

impl LogReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open log {}", path.display()))?;
        Ok(Self {
            source: Box::new(BufReader::new(file)),
            origin: path.display().to_string(),
        })
    }

    pub(crate) fn empty() -> Self {
        Self {
            source: Box::new(io::empty()),
            origin: "<empty>".to_string(),
        }
    }

    /// Next raw record, or `None` at the end of the journal.
    pub fn next_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        let read = read_up_to(&mut self.source, &mut prefix)
            .with_context(|| format!("read of {} failed", self.origin))?;
        if read == 0 {
            return Ok(None);
        }
        if read < LENGTH_PREFIX {
            tracing::warn!("{}: truncated record header, ignoring tail", self.origin);
            return Ok(None);
        }
        let len = u32::from_be_bytes(prefix) as usize;
        let mut body = Vec::new();
        (&mut self.source)
            .take(len as u64)
            .read_to_end(&mut body)
            .with_context(|| format!("read of {} failed", self.origin))?;
        if body.len() < len {
            tracing::warn!(
                "{}: truncated record ({} of {} bytes), ignoring tail",
                self.origin,
                body.len(),
                len
            );
            return Ok(None);
        }
        Ok(Some(body))
    }

    pub fn next_record<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.next_bytes()? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .with_context(|| format!("deserialize record from {} failed", self.origin)),
            None => Ok(None),
        }
    }

    pub fn read_all<T: DeserializeOwned>(mut self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("origin", &self.origin)
            .finish()
    }
}

fn read_up_to(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
