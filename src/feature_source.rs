use std::{
    io::{self, BufRead, BufReader, Cursor, Read},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
};

use tracing::debug;

use crate::error::{FeedError, Result};

/// Chunk numbers are 1-based.
pub trait FeatureSource {
    type Stream: BufRead;

    fn open_chunk(&mut self, chunk: usize) -> Result<Self::Stream>;

    /// Called after the stream reported its end. Dropping a stream without closing it
    /// abandons the chunk.
    fn close_chunk(&mut self, stream: Self::Stream) -> Result<()> {
        drop(stream);
        Ok(())
    }
}

/// Runs `splice-feats` over `<split_dir>/<chunk>/feats.scp` and streams its stdout.
#[derive(Debug, Clone)]
pub struct SpliceFeats {
    pub binary: PathBuf,
    pub split_dir: PathBuf,
    pub left_context: usize,
    pub right_context: usize,
}

impl SpliceFeats {
    pub fn command(&self, chunk: usize) -> Command {
        let scp = self.split_dir.join(chunk.to_string()).join("feats.scp");
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--print-args=false")
            .arg(format!("--left-context={}", self.left_context))
            .arg(format!("--right-context={}", self.right_context))
            .arg(format!("scp:{}", scp.display()))
            .arg("ark:-");
        cmd
    }

    fn tool_name(&self) -> String {
        self.binary.display().to_string()
    }
}

impl FeatureSource for SpliceFeats {
    type Stream = SplicedChunk;

    fn open_chunk(&mut self, chunk: usize) -> Result<SplicedChunk> {
        let mut child = self
            .command(chunk)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| FeedError::Tool {
                tool: self.tool_name(),
                message: format!("failed to start for chunk {chunk}: {e}"),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| FeedError::Tool {
            tool: self.tool_name(),
            message: "stdout was not captured".to_string(),
        })?;
        debug!(chunk, pid = child.id(), "spawned feature splicer");
        Ok(SplicedChunk {
            chunk,
            child: Some(child),
            stdout: BufReader::new(stdout),
        })
    }

    fn close_chunk(&mut self, mut stream: SplicedChunk) -> Result<()> {
        let Some(mut child) = stream.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| FeedError::Tool {
            tool: self.tool_name(),
            message: format!("waiting for chunk {}: {e}", stream.chunk),
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(FeedError::Tool {
                tool: self.tool_name(),
                message: format!("chunk {} exited with {status}", stream.chunk),
            })
        }
    }
}

/// Stdout of a running splicer. Dropping it before the process was reaped kills the process.
pub struct SplicedChunk {
    chunk: usize,
    child: Option<Child>,
    stdout: BufReader<ChildStdout>,
}

impl Read for SplicedChunk {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl BufRead for SplicedChunk {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.stdout.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.stdout.consume(amt)
    }
}

impl Drop for SplicedChunk {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FeatureSource for Vec<Vec<u8>> {
    type Stream = Cursor<Vec<u8>>;

    fn open_chunk(&mut self, chunk: usize) -> Result<Self::Stream> {
        chunk
            .checked_sub(1)
            .and_then(|ix| self.get(ix))
            .map(|bytes| Cursor::new(bytes.clone()))
            .ok_or_else(|| FeedError::Tool {
                tool: "in-memory features".to_string(),
                message: format!("no chunk {chunk}"),
            })
    }
}
