use std::{
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::Path,
};

use crate::{
    ark_codec::{Utterance, read_utterance},
    error::{FeedError, Result},
};

/// Teacher posteriors for the whole corpus, read once per epoch and then rewound.
pub struct TeacherPredictions<R> {
    reader: R,
    position: usize,
}

impl TeacherPredictions<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            FeedError::io(format!("opening teacher predictions {}", path.display()), e)
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead + Seek> TeacherPredictions<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            position: 0,
        }
    }

    pub fn next_utterance(&mut self) -> Result<Option<Utterance>> {
        let utt = read_utterance(&mut self.reader)?;
        if utt.is_some() {
            self.position += 1;
        }
        Ok(utt)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| FeedError::io("rewinding teacher predictions", e))?;
        self.position = 0;
        Ok(())
    }

    /// Records consumed since the last rewind.
    pub fn position(&self) -> usize {
        self.position
    }
}
