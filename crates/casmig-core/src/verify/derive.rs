//! Regeneration of derived files (thumbnails, resized variants).
//!
//! A file counts as derived from an original when running a derivation over
//! the original's bytes produces exactly the stored file's bytes. This only
//! holds while the derivation is deterministic and unchanged: files produced
//! by an older version of a derivation are not recognised.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MigrationError, Result};
use crate::hash::{content_hash, storage_path};
use crate::storage::{read_to_vec, FileStorage};

/// A pure function from original bytes to derived bytes.
pub trait Derivation: Send + Sync {
    /// Label reported for files produced by this derivation, e.g. "thumbnail".
    fn kind(&self) -> &str;

    fn derive(&self, original: &[u8]) -> Result<Vec<u8>>;
}

/// Where a derived hash came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedOrigin {
    pub original_hash: String,
    pub kind: String,
}

/// Derived hash to origin, computed once per verification call.
#[derive(Debug, Default)]
pub struct DerivedIndex {
    by_derived: HashMap<String, DerivedOrigin>,
}

impl DerivedIndex {
    /// Regenerate every derivation for every original present in `storage`.
    /// Originals that cannot be read or decoded are skipped.
    pub async fn build<'a, I>(
        storage: &dyn FileStorage,
        originals: I,
        derivations: &[Arc<dyn Derivation>],
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut index = DerivedIndex::default();
        if derivations.is_empty() {
            return Ok(index);
        }
        for original_hash in originals {
            let path = storage_path(original_hash)?;
            let Some(reader) = storage.read(&path).await? else {
                continue;
            };
            let bytes = Arc::new(read_to_vec(reader).await?);
            for derivation in derivations {
                let derivation = derivation.clone();
                let input = bytes.clone();
                let derived = tokio::task::spawn_blocking(move || {
                    derivation
                        .derive(&input)
                        .map(|out| (derivation.kind().to_string(), content_hash(&out)))
                })
                .await
                .map_err(|e| MigrationError::Derivation(e.to_string()))?;

                match derived {
                    Ok((kind, hash)) if hash != *original_hash => {
                        index.by_derived.entry(hash).or_insert(DerivedOrigin {
                            original_hash: original_hash.clone(),
                            kind,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(original = %original_hash, error = %e, "derivation skipped");
                    }
                }
            }
        }
        Ok(index)
    }

    pub fn origin_of(&self, hash: &str) -> Option<&DerivedOrigin> {
        self.by_derived.get(hash)
    }

    /// `(derived_hash, kind)` for everything derived from `original_hash`.
    pub fn derived_from<'a>(&'a self, original_hash: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.by_derived
            .iter()
            .filter(move |(_, origin)| origin.original_hash == original_hash)
            .map(|(hash, origin)| (hash.as_str(), origin.kind.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_derived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_derived.is_empty()
    }
}

#[cfg(feature = "images")]
pub use fit::FitToWidth;

#[cfg(feature = "images")]
mod fit {
    use std::io::Cursor;

    use image::imageops::FilterType;
    use image::{DynamicImage, ImageFormat};

    use super::Derivation;
    use crate::error::{MigrationError, Result};

    /// Scale to exactly `width` pixels wide, up or down, keeping the aspect
    /// ratio, and re-encode as JPEG.
    #[derive(Debug, Clone)]
    pub struct FitToWidth {
        kind: String,
        width: u32,
    }

    impl FitToWidth {
        pub const THUMBNAIL_WIDTH: u32 = 200;
        pub const RESIZED_WIDTH: u32 = 800;

        pub fn new(kind: impl Into<String>, width: u32) -> Self {
            FitToWidth {
                kind: kind.into(),
                width: width.max(1),
            }
        }

        pub fn thumbnail() -> Self {
            Self::new("thumbnail", Self::THUMBNAIL_WIDTH)
        }

        pub fn resized() -> Self {
            Self::new("resized", Self::RESIZED_WIDTH)
        }
    }

    impl Derivation for FitToWidth {
        fn kind(&self) -> &str {
            &self.kind
        }

        fn derive(&self, original: &[u8]) -> Result<Vec<u8>> {
            let img = image::load_from_memory(original)
                .map_err(|e| MigrationError::Derivation(e.to_string()))?;
            let img = if img.width() == self.width {
                img
            } else {
                let (width, height) = (u64::from(img.width()), u64::from(img.height()));
                let scaled = ((height * u64::from(self.width) + width / 2) / width).max(1);
                img.resize_exact(self.width, scaled as u32, FilterType::Triangle)
            };
            let mut out = Vec::new();
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
                .map_err(|e| MigrationError::Derivation(e.to_string()))?;
            Ok(out)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use image::{ImageBuffer, Rgb};

        fn png(width: u32, height: u32) -> Vec<u8> {
            let buf = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
            let mut bytes = Vec::new();
            DynamicImage::ImageRgb8(buf)
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .unwrap();
            bytes
        }

        #[test]
        fn test_thumbnail_is_scaled_and_deterministic() {
            let original = png(400, 100);
            let thumb = FitToWidth::thumbnail();
            let a = thumb.derive(&original).unwrap();
            let b = thumb.derive(&original).unwrap();
            assert_eq!(a, b);
            let decoded = image::load_from_memory(&a).unwrap();
            assert_eq!(decoded.width(), 200);
            assert_eq!(decoded.height(), 50);
        }

        #[test]
        fn test_narrow_image_is_scaled_up() {
            let derived = FitToWidth::resized().derive(&png(30, 20)).unwrap();
            let decoded = image::load_from_memory(&derived).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (800, 533));
        }

        #[test]
        fn test_image_at_width_keeps_size() {
            let derived = FitToWidth::thumbnail().derive(&png(200, 120)).unwrap();
            let decoded = image::load_from_memory(&derived).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (200, 120));
        }

        #[test]
        fn test_non_image_fails() {
            assert!(FitToWidth::thumbnail().derive(b"not an image").is_err());
        }
    }
}
