//! Cross-crate tests: codec, stage interplay and whole archives.

#[cfg(test)]
mod support;

#[cfg(test)]
mod archive;
#[cfg(test)]
mod codec;
#[cfg(test)]
mod transforms;
