use kdam::{BarExt, tqdm};

use crate::error::{Error, Result};

/// Number of texts encoded per model call during index builds.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// A bi-encoder that maps texts to fixed-size dense vectors.
///
/// Implementations do not need to normalize their output; callers go
/// through [`embed_all`] or [`embed_query`], which do.
pub trait Embedder: Send + Sync {
    /// Identifier recorded next to the index so a reload can tell which
    /// model produced the vectors.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed(texts)
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Encode `texts` in batches, normalizing every vector.
///
/// Output order matches input order. Fails if the embedder returns the
/// wrong number of vectors or a vector of the wrong dimension.
pub fn embed_all<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[String],
    batch_size: usize,
    show_progress: bool,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());

    let mut bar = show_progress
        .then(|| tqdm!(total = texts.len(), desc = "Embedding", unit = "rec"));

    for batch in texts.chunks(batch_size) {
        let encoded = embedder.embed(batch)?;
        if encoded.len() != batch.len() {
            return Err(Error::Model(format!(
                "embedder returned {} vectors for {} texts",
                encoded.len(),
                batch.len()
            )));
        }

        for mut vector in encoded {
            check_dimension(embedder, &vector)?;
            l2_normalize(&mut vector);
            vectors.push(vector);
        }

        if let Some(bar) = bar.as_mut() {
            bar.update(batch.len()).ok();
        }
    }

    if bar.is_some() {
        eprintln!();
    }
    Ok(vectors)
}

/// Encode a single query with the same normalization as [`embed_all`].
pub fn embed_query<E: Embedder + ?Sized>(
    embedder: &E,
    query: &str,
) -> Result<Vec<f32>> {
    let mut vector = embedder
        .embed(&[query.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Model("embedder returned no vector".into()))?;
    check_dimension(embedder, &vector)?;
    l2_normalize(&mut vector);
    Ok(vector)
}

fn check_dimension<E: Embedder + ?Sized>(
    embedder: &E,
    vector: &[f32],
) -> Result<()> {
    if vector.len() != embedder.dimension() {
        return Err(Error::Model(format!(
            "expected {}-dimensional vector, got {}",
            embedder.dimension(),
            vector.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;

    struct Broken;

    impl Embedder for Broken {
        fn model_id(&self) -> &str {
            "broken"
        }

        fn dimension(&self) -> usize {
            4
        }

        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
        }
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn embed_all_keeps_order_across_batches() {
        let embedder = HashEmbedder::new(64);
        let texts: Vec<String> =
            (0..7).map(|i| format!("record number {i}")).collect();

        let batched = embed_all(&embedder, &texts, 3, false).unwrap();
        let single = embed_all(&embedder, &texts, 100, false).unwrap();

        assert_eq!(batched.len(), 7);
        assert_eq!(batched, single);
        for v in &batched {
            assert!((norm(v) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn query_matches_document_encoding() {
        let embedder = HashEmbedder::new(32);
        let doc = embed_all(&embedder, &["java test".to_string()], 1, false)
            .unwrap()
            .remove(0);
        let query = embed_query(&embedder, "java test").unwrap();
        assert_eq!(doc, query);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = embed_query(&Broken, "anything").unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }

    #[test]
    fn empty_input_embeds_nothing() {
        let embedder = HashEmbedder::new(8);
        assert!(embed_all(&embedder, &[], 32, false).unwrap().is_empty());
    }
}
