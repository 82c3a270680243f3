//! Notebook fixtures and helpers writing them to disk

use nbpress::{Block, Document};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Notebook as saved by the notebook front end: markdown, two code cells,
/// sources stored as line lists, stale outputs
pub const SAVED_NOTEBOOK: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "metadata": {},
   "source": [
    "# Growth\n",
    "A short introduction."
   ]
  },
  {
   "cell_type": "code",
   "execution_count": 7,
   "metadata": {"collapsed": false},
   "outputs": [
    {
     "name": "stdout",
     "output_type": "stream",
     "text": ["stale\n"]
    }
   ],
   "source": [
    "x = 1"
   ]
  },
  {
   "cell_type": "code",
   "execution_count": null,
   "metadata": {},
   "outputs": [],
   "source": "print(x+1)"
  }
 ],
 "metadata": {
  "kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"}
 },
 "nbformat": 4,
 "nbformat_minor": 5
}
"##;

/// Write a notebook made of code blocks to `dir/name`
pub async fn write_code_notebook(dir: &Path, name: &str, sources: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let document = Document::new(sources.iter().map(|s| Block::code(*s)).collect());
    document.write(&path).await.expect("Failed to write notebook");
    path
}

/// Write [`SAVED_NOTEBOOK`] to `dir/name`
pub fn write_saved_notebook(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, SAVED_NOTEBOOK).expect("Failed to write notebook");
    path
}

/// Move a file's modification time by `offset` seconds from now
pub fn set_mtime_offset(path: &Path, offset: i64) {
    let now = SystemTime::now();
    let time = if offset >= 0 {
        now + Duration::from_secs(offset.unsigned_abs())
    } else {
        now - Duration::from_secs(offset.unsigned_abs())
    };
    let file = std::fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    file.set_modified(time).expect("Failed to set mtime");
}
