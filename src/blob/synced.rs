//! Host/device synchronized storage backing each blob view.
//!
//! The head tracks which copy is authoritative. Reads through one residency
//! pull the other copy across lazily; mutable access marks the other copy stale.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
#[cfg(feature = "wgpu")]
use std::sync::Arc;

use crate::error::{Error, Result};
#[cfg(feature = "wgpu")]
use crate::math::gpu::GpuDevice;

/// Which copy of a [`SyncedMemory`] currently holds valid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHead {
    /// Nothing allocated yet; the first access allocates zeros.
    Uninitialized,
    /// Host copy is authoritative, device copy (if any) is stale.
    AtHost,
    /// Device copy is authoritative, host copy is stale.
    AtDevice,
    /// Both copies hold the same values.
    Synced,
}

/// Flat `f32` storage that can live on the host, on an accelerator, or both.
///
/// The two copies sit in separate cells so that a live host view does not
/// block an upload of the same values, and a live device view does not block
/// a readback.
pub struct SyncedMemory {
    len: usize,
    head: Cell<SyncHead>,
    host: RefCell<Vec<f32>>,
    #[cfg(feature = "wgpu")]
    device: RefCell<Option<DeviceCopy>>,
}

#[cfg(feature = "wgpu")]
struct DeviceCopy {
    device: Arc<GpuDevice>,
    buffer: wgpu::Buffer,
}

impl SyncedMemory {
    /// Create uninitialized storage for `len` values.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            head: Cell::new(SyncHead::Uninitialized),
            host: RefCell::new(Vec::new()),
            #[cfg(feature = "wgpu")]
            device: RefCell::new(None),
        }
    }

    /// Create host-resident storage holding `values`.
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            len: values.len(),
            head: Cell::new(SyncHead::AtHost),
            host: RefCell::new(values),
            #[cfg(feature = "wgpu")]
            device: RefCell::new(None),
        }
    }

    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current residency state.
    pub fn head(&self) -> SyncHead {
        self.head.get()
    }

    fn host_ref(&self) -> Result<Ref<'_, Vec<f32>>> {
        self.host
            .try_borrow()
            .map_err(|_| Error::Borrowed("host copy is being rewritten"))
    }

    fn host_mut(&self) -> Result<RefMut<'_, Vec<f32>>> {
        self.host
            .try_borrow_mut()
            .map_err(|_| Error::Borrowed("host copy has a live view"))
    }

    fn host_is_stale(&self) -> bool {
        matches!(self.head.get(), SyncHead::Uninitialized | SyncHead::AtDevice)
    }

    fn sync_to_host(&self) -> Result<()> {
        match self.head.get() {
            SyncHead::Uninitialized => {
                *self.host_mut()? = vec![0.0; self.len];
                self.head.set(SyncHead::AtHost);
            }
            #[cfg(feature = "wgpu")]
            SyncHead::AtDevice => {
                let values = {
                    let slot = self.device_ref()?;
                    let copy = slot
                        .as_ref()
                        .ok_or_else(|| Error::Device("device head without a buffer".to_string()))?;
                    tracing::debug!(len = self.len, "synchronizing device memory to host");
                    copy.device.read_buffer(&copy.buffer, self.len)?
                };
                *self.host_mut()? = values;
                self.head.set(SyncHead::Synced);
            }
            #[cfg(not(feature = "wgpu"))]
            SyncHead::AtDevice => {
                return Err(Error::Device(
                    "device-resident memory without accelerator support".to_string(),
                ));
            }
            SyncHead::AtHost | SyncHead::Synced => {}
        }
        Ok(())
    }

    #[cfg(feature = "wgpu")]
    fn device_ref(&self) -> Result<Ref<'_, Option<DeviceCopy>>> {
        self.device
            .try_borrow()
            .map_err(|_| Error::Borrowed("device copy is being replaced"))
    }

    #[cfg(feature = "wgpu")]
    fn device_mut(&self) -> Result<RefMut<'_, Option<DeviceCopy>>> {
        self.device
            .try_borrow_mut()
            .map_err(|_| Error::Borrowed("device copy has a live view"))
    }

    /// `Some(true)` when the device copy lives on `device`, `Some(false)` when
    /// it lives elsewhere, `None` when there is no device copy.
    #[cfg(feature = "wgpu")]
    fn resident_on(&self, device: &Arc<GpuDevice>) -> Result<Option<bool>> {
        Ok(self
            .device_ref()?
            .as_ref()
            .map(|copy| Arc::ptr_eq(&copy.device, device)))
    }

    #[cfg(feature = "wgpu")]
    fn device_is_stale(&self, device: &Arc<GpuDevice>) -> Result<bool> {
        let on_device = self.resident_on(device)? == Some(true);
        Ok(!on_device || matches!(self.head.get(), SyncHead::Uninitialized | SyncHead::AtHost))
    }

    #[cfg(feature = "wgpu")]
    fn sync_to_device(&self, device: &Arc<GpuDevice>) -> Result<()> {
        if self.resident_on(device)? == Some(false) {
            self.sync_to_host()?;
            *self.device_mut()? = None;
            self.head.set(SyncHead::AtHost);
        }

        match self.head.get() {
            SyncHead::Uninitialized => {
                *self.device_mut()? = Some(DeviceCopy {
                    device: Arc::clone(device),
                    buffer: device.create_buffer(self.len),
                });
                self.head.set(SyncHead::AtDevice);
            }
            SyncHead::AtHost => {
                let mut slot = self.device_mut()?;
                let copy = slot.get_or_insert_with(|| DeviceCopy {
                    device: Arc::clone(device),
                    buffer: device.create_buffer(self.len),
                });
                tracing::debug!(len = self.len, "synchronizing host memory to device");
                device.upload(&copy.buffer, &self.host_ref()?);
                self.head.set(SyncHead::Synced);
            }
            SyncHead::AtDevice | SyncHead::Synced => {}
        }
        Ok(())
    }

    /// Read-only host view, pulling device data back first when needed.
    ///
    /// # Errors
    ///
    /// [`Error::Borrowed`] when the readback would overwrite a host copy that
    /// is still borrowed, [`Error::Device`] when the readback itself fails.
    pub fn cpu_data(&self) -> Result<Ref<'_, [f32]>> {
        if self.host_is_stale() {
            self.sync_to_host()?;
        }
        Ok(Ref::map(self.host_ref()?, |host| host.as_slice()))
    }

    /// Writable host view; any device copy becomes stale.
    pub fn mutable_cpu_data(&mut self) -> Result<&mut [f32]> {
        self.sync_to_host()?;
        self.head.set(SyncHead::AtHost);
        Ok(self.host.get_mut().as_mut_slice())
    }

    /// Overwrite the host copy with `values`.
    pub fn set_data(&mut self, values: &[f32]) -> Result<()> {
        if values.len() != self.len {
            return Err(Error::Shape(format!(
                "cannot store {} values in memory of length {}",
                values.len(),
                self.len
            )));
        }
        self.mutable_cpu_data()?.copy_from_slice(values);
        Ok(())
    }

    /// Read-only device buffer, uploading host data first when needed.
    ///
    /// Outstanding host views stay valid: the upload only reads the host copy.
    #[cfg(feature = "wgpu")]
    pub fn gpu_data(&self, device: &Arc<GpuDevice>) -> Result<Ref<'_, wgpu::Buffer>> {
        if self.device_is_stale(device)? {
            self.sync_to_device(device)?;
        }
        Ref::filter_map(self.device_ref()?, |slot| slot.as_ref().map(|copy| &copy.buffer))
            .map_err(|_| Error::Device("memory has no device buffer".to_string()))
    }

    /// Writable device buffer; the host copy becomes stale.
    #[cfg(feature = "wgpu")]
    pub fn mutable_gpu_data(&mut self, device: &Arc<GpuDevice>) -> Result<&wgpu::Buffer> {
        self.sync_to_device(device)?;
        self.head.set(SyncHead::AtDevice);
        self.device
            .get_mut()
            .as_ref()
            .map(|copy| &copy.buffer)
            .ok_or_else(|| Error::Device("memory has no device buffer".to_string()))
    }
}

impl fmt::Debug for SyncedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedMemory")
            .field("len", &self.len)
            .field("head", &self.head())
            .finish()
    }
}
