use ndarray::{Array1, Array2, ArrayViewMut2};

/// Dense row-major matrix; embedding matrices hold one row per token.
pub type Matrix = Array2<f32>;
pub type Vector = Array1<f32>;

/// Position of a head inside its attention block.
pub type HeadId = usize;

/// The four projections owned by one attention head.
///
/// Generic over the storage so the same layout serves owned weights and the
/// scoped mutable views handed to an optimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadWeights<T> {
    /// [key_query_dim, embedding_dim]
    pub query: T,
    /// [key_query_dim, embedding_dim]
    pub key: T,
    /// [key_query_dim, embedding_dim]
    pub value_down: T,
    /// [embedding_dim, key_query_dim]
    pub value_up: T,
}

impl<T> HeadWeights<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> HeadWeights<U> {
        HeadWeights {
            query: f(self.query),
            key: f(self.key),
            value_down: f(self.value_down),
            value_up: f(self.value_up),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.query, &self.key, &self.value_down, &self.value_up].into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        [
            &mut self.query,
            &mut self.key,
            &mut self.value_down,
            &mut self.value_up,
        ]
        .into_iter()
    }
}

impl HeadWeights<Matrix> {
    /// Shape-preserving mutable views over every weight matrix.
    pub fn view_mut(&mut self) -> HeadWeights<ArrayViewMut2<'_, f32>> {
        HeadWeights {
            query: self.query.view_mut(),
            key: self.key.view_mut(),
            value_down: self.value_down.view_mut(),
            value_up: self.value_up.view_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> HeadWeights<Matrix> {
        HeadWeights {
            query: Matrix::zeros((1, 2)),
            key: Matrix::zeros((1, 2)),
            value_down: Matrix::zeros((1, 2)),
            value_up: Matrix::zeros((2, 1)),
        }
    }

    #[test]
    fn test_map_and_iter_follow_field_order() {
        let shapes: Vec<_> = weights().iter().map(|m| m.dim()).collect();
        assert_eq!(shapes, vec![(1, 2), (1, 2), (1, 2), (2, 1)]);

        let sizes = weights().map(|m| m.len());
        assert_eq!(sizes.value_up, 2);
    }

    #[test]
    fn test_view_mut_writes_through() {
        let mut w = weights();
        {
            let mut views = w.view_mut();
            views.value_up.fill(3.0);
            views.query[[0, 1]] = 1.0;
        }
        assert_eq!(w.value_up.sum(), 6.0);
        assert_eq!(w.query[[0, 1]], 1.0);

        for m in w.iter_mut() {
            m.fill(0.0);
        }
        assert!(w.iter().all(|m| m.sum() == 0.0));
    }
}
