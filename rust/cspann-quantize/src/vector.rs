use crate::{QuantizeError, check_dims};

/// A single vector
pub type Vector = Vec<f32>;

/// A set of vectors of equal dimensionality, stored contiguously
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorSet {
    dims: usize,
    data: Vec<f32>,
}

impl VectorSet {
    /// Create an empty set of `dims`-dimensional vectors
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    /// Create a set from individual vectors, all of which must have `dims`
    /// dimensions
    pub fn from_vectors<V>(dims: usize, vectors: &[V]) -> Result<Self, QuantizeError>
    where
        V: AsRef<[f32]>,
    {
        let mut set = Self::new(dims);
        set.data.reserve(dims * vectors.len());
        for vector in vectors {
            set.push(vector.as_ref())?;
        }
        Ok(set)
    }

    /// The dimensionality of every vector in the set
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// The number of vectors in the set
    pub fn count(&self) -> usize {
        if self.dims == 0 {
            return 0;
        }
        self.data.len() / self.dims
    }

    /// True if the set holds no vectors
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The vector at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds
    pub fn at(&self, index: usize) -> &[f32] {
        &self.data[index * self.dims..(index + 1) * self.dims]
    }

    /// Append a vector to the set
    pub fn push(&mut self, vector: &[f32]) -> Result<(), QuantizeError> {
        check_dims(self.dims, vector.len())?;
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Iterate the vectors of the set in order
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.count()).map(|index| self.at(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_stores_vectors_contiguously() -> anyhow::Result<()> {
        let set = VectorSet::from_vectors(2, &[vec![1.0, 0.0], vec![0.0, 1.0]])?;

        assert_eq!(set.count(), 2);
        assert_eq!(set.at(1), &[0.0, 1.0]);
        assert_eq!(set.iter().count(), 2);

        Ok(())
    }

    #[test]
    fn it_rejects_vectors_of_the_wrong_dimensionality() {
        let mut set = VectorSet::new(3);

        assert_eq!(
            set.push(&[1.0]),
            Err(QuantizeError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        );
        assert!(set.is_empty());
    }
}
