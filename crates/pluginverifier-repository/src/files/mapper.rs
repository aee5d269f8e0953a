use std::fmt;
use std::marker::PhantomData;

use sha2::{Digest, Sha256};

/// Maps repository keys to file names inside the repository directory, and back.
///
/// The reverse mapping is used when seeding a repository from disk. Files for which it returns
/// `None` are not registered.
pub trait FileNameMapper<K>: Send + Sync + 'static {
    fn file_name(&self, key: &K) -> String;

    fn key(&self, file_name: &str) -> Option<K>;
}

/// Uses the key itself as the file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFileNameMapper;

impl FileNameMapper<String> for IdentityFileNameMapper {
    fn file_name(&self, key: &String) -> String {
        key.clone()
    }

    fn key(&self, file_name: &str) -> Option<String> {
        let is_safe = !file_name.is_empty()
            && !file_name.starts_with('.')
            && !file_name.contains(['/', '\\']);
        is_safe.then(|| file_name.to_owned())
    }
}

type ReverseMapping<K> = Box<dyn Fn(&str) -> Option<K> + Send + Sync>;

/// Names files by the SHA-256 digest of the key's [`Display`](fmt::Display) output.
///
/// Digests cannot be reversed, so seeding only recognizes files if a reverse mapping is set with
/// [`with_reverse`](Self::with_reverse).
pub struct HashedFileNameMapper<K> {
    extension: Option<String>,
    reverse: Option<ReverseMapping<K>>,
    _key: PhantomData<fn() -> K>,
}

impl<K> HashedFileNameMapper<K> {
    pub fn new() -> Self {
        Self {
            extension: None,
            reverse: None,
            _key: PhantomData,
        }
    }

    /// Appends `.{extension}` to every file name.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Resolves file names found on disk back to keys.
    pub fn with_reverse(
        mut self,
        reverse: impl Fn(&str) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        self.reverse = Some(Box::new(reverse));
        self
    }
}

impl<K> Default for HashedFileNameMapper<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for HashedFileNameMapper<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedFileNameMapper")
            .field("extension", &self.extension)
            .field("reverse", &self.reverse.is_some())
            .finish()
    }
}

impl<K> FileNameMapper<K> for HashedFileNameMapper<K>
where
    K: fmt::Display + 'static,
{
    fn file_name(&self, key: &K) -> String {
        let digest = hex::encode(Sha256::digest(key.to_string().as_bytes()));
        match &self.extension {
            Some(extension) => format!("{digest}.{extension}"),
            None => digest,
        }
    }

    fn key(&self, file_name: &str) -> Option<K> {
        let reverse = self.reverse.as_ref()?;
        reverse(file_name)
    }
}
