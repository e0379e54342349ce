//! Shaped tensors with paired value and gradient storage.
//!
//! A [`Blob`] uses the (num, channels, height, width) convention. Fully-connected
//! layers only look at it as a 2-D matrix: `num` rows of `count / num` values.

pub mod synced;

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::error::{Error, Result};

pub use synced::{SyncHead, SyncedMemory};

/// Reference-counted blob handle so several layers can own one parameter.
pub type SharedBlob = Rc<RefCell<Blob>>;

/// N-dimensional buffer with a `data` view (values) and a `diff` view (gradients).
///
/// Both views always have the same shape.
///
/// # Example
///
/// ```
/// use rust_inner_product::blob::Blob;
///
/// let mut blob = Blob::new(2, 3, 1, 1);
/// blob.mutable_cpu_data().unwrap().copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
/// assert_eq!(blob.count(), 6);
/// assert_eq!(blob.offset(1, 2, 0, 0), 5);
/// assert_eq!(blob.cpu_data().unwrap()[5], 6.0);
/// ```
#[derive(Debug)]
pub struct Blob {
    num: usize,
    channels: usize,
    height: usize,
    width: usize,
    count: usize,
    data: SyncedMemory,
    diff: SyncedMemory,
}

impl Blob {
    /// Create a blob of the given shape with uninitialized (zero on first read) storage.
    pub fn new(num: usize, channels: usize, height: usize, width: usize) -> Self {
        let count = num * channels * height * width;
        Self {
            num,
            channels,
            height,
            width,
            count,
            data: SyncedMemory::new(count),
            diff: SyncedMemory::new(count),
        }
    }

    /// Wrap into a [`SharedBlob`] handle.
    pub fn into_shared(self) -> SharedBlob {
        Rc::new(RefCell::new(self))
    }

    /// Change the shape. Storage is kept when the element count is unchanged,
    /// otherwise both views are reallocated.
    pub fn reshape(&mut self, num: usize, channels: usize, height: usize, width: usize) {
        let count = num * channels * height * width;
        self.num = num;
        self.channels = channels;
        self.height = height;
        self.width = width;
        if count != self.count {
            self.count = count;
            self.data = SyncedMemory::new(count);
            self.diff = SyncedMemory::new(count);
        }
    }

    pub fn num(&self) -> usize {
        self.num
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Total number of elements.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Shape as `[num, channels, height, width]`.
    pub fn shape(&self) -> [usize; 4] {
        [self.num, self.channels, self.height, self.width]
    }

    /// Flat index of element `(n, c, h, w)` in row-major order.
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        ((n * self.channels + c) * self.height + h) * self.width + w
    }

    pub fn data(&self) -> &SyncedMemory {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SyncedMemory {
        &mut self.data
    }

    pub fn diff(&self) -> &SyncedMemory {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut SyncedMemory {
        &mut self.diff
    }

    pub fn cpu_data(&self) -> Result<Ref<'_, [f32]>> {
        self.data.cpu_data()
    }

    pub fn mutable_cpu_data(&mut self) -> Result<&mut [f32]> {
        self.data.mutable_cpu_data()
    }

    pub fn cpu_diff(&self) -> Result<Ref<'_, [f32]>> {
        self.diff.cpu_data()
    }

    pub fn mutable_cpu_diff(&mut self) -> Result<&mut [f32]> {
        self.diff.mutable_cpu_data()
    }

    /// Copy values (or gradients when `copy_diff`) from `source`.
    ///
    /// With `reshape` the blob takes the source shape first; otherwise the
    /// element counts must agree.
    pub fn copy_from(&mut self, source: &Blob, copy_diff: bool, reshape: bool) -> Result<()> {
        if source.count != self.count || source.shape() != self.shape() {
            if !reshape {
                return Err(Error::Shape(format!(
                    "cannot copy blob of shape {:?} into {:?} without reshape",
                    source.shape(),
                    self.shape()
                )));
            }
            self.reshape(source.num, source.channels, source.height, source.width);
        }

        if copy_diff {
            let values = source.cpu_diff()?;
            self.mutable_cpu_diff()?.copy_from_slice(&values);
        } else {
            let values = source.cpu_data()?;
            self.mutable_cpu_data()?.copy_from_slice(&values);
        }
        Ok(())
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}
