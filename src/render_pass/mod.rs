//! Framebuffers and the attachment layouts that validate them.
//!
//! A pipeline declares a [`FramebufferLayout`]: which attachment locations
//! it renders to, with what formats, load/store ops and blend state. A
//! [`Framebuffer`] is populated against such a layout one attachment at a
//! time; every attach call is validated for location, format and clear
//! value. The native render pass and framebuffer objects are built the
//! moment the last location is filled; after that they are rebuilt lazily,
//! and only when an attachment actually changes.

use crate::{
    backend::{
        AttachmentBlend, BackendError, FramebufferHandle, ImageViewHandle, RenderPassAttachmentDesc,
        RenderPassDesc, RenderPassHandle,
    },
    deferred::RetiredResource,
    device::Device,
};
use ash::vk;
use std::{collections::BTreeMap, error, fmt};

/// Whether a format carries a depth aspect.
pub fn format_has_depth(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// A clear value in host representation.
///
/// Kept as an enum rather than the raw API union so attachments stay
/// comparable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    ColorF32([f32; 4]),
    ColorI32([i32; 4]),
    ColorU32([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    fn is_depth_stencil(&self) -> bool {
        matches!(self, ClearValue::DepthStencil { .. })
    }
}

/// What a pipeline expects of one attachment location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentLayout {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    /// Blend state; ignored for depth attachments.
    pub blend: AttachmentBlend,
}

impl AttachmentLayout {
    pub fn clears_on_load(&self) -> bool {
        self.load_op == vk::AttachmentLoadOp::CLEAR
    }

    pub fn is_depth(&self) -> bool {
        format_has_depth(self.format)
    }
}

/// The attachment layout a pipeline renders into, keyed by location.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramebufferLayout {
    pub attachments: BTreeMap<u32, AttachmentLayout>,
    pub extent: [u32; 2],
}

impl FramebufferLayout {
    /// Whether a framebuffer built for `other` can serve this layout.
    /// Blend state does not affect attachment compatibility.
    pub fn compatible(&self, other: &FramebufferLayout) -> bool {
        self.extent == other.extent
            && self.attachments.len() == other.attachments.len()
            && self.attachments.iter().zip(&other.attachments).all(
                |((loc_a, a), (loc_b, b))| {
                    loc_a == loc_b
                        && a.format == b.format
                        && a.load_op == b.load_op
                        && a.store_op == b.store_op
                },
            )
    }

    /// The render-pass description this layout implies.
    pub fn render_pass_desc(&self) -> RenderPassDesc {
        RenderPassDesc {
            attachments: self
                .attachments
                .values()
                .map(|a| RenderPassAttachmentDesc {
                    format: a.format,
                    load_op: a.load_op,
                    store_op: a.store_op,
                    is_depth: a.is_depth(),
                })
                .collect(),
        }
    }

    /// Blend state per non-depth attachment, in location order.
    pub fn attachment_blends(&self) -> Vec<AttachmentBlend> {
        self.attachments
            .values()
            .filter(|a| !a.is_depth())
            .map(|a| a.blend)
            .collect()
    }
}

/// One image view attached to a framebuffer location.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attachment {
    pub view: ImageViewHandle,
    pub format: vk::Format,
    /// Required when the location clears on load, forbidden otherwise.
    pub clear_value: Option<ClearValue>,
}

/// Error attaching an image view to a framebuffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FramebufferError {
    /// The layout has no attachment at this location.
    InvalidAttachmentLocation { location: u32 },
    /// The view's format differs from what the layout declares.
    AttachmentFormatMismatch {
        location: u32,
        expected: vk::Format,
        provided: vk::Format,
    },
    /// A clear value was missing, superfluous, or of the wrong aspect for
    /// the location's load op and format.
    ClearValueMismatch { location: u32 },
    /// Native object creation failed.
    Backend(BackendError),
}

impl fmt::Display for FramebufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramebufferError::InvalidAttachmentLocation { location } => {
                write!(f, "the framebuffer layout has no attachment {}", location)
            }
            FramebufferError::AttachmentFormatMismatch {
                location,
                expected,
                provided,
            } => write!(
                f,
                "attachment {} expects format {:?} but the view has {:?}",
                location, expected, provided
            ),
            FramebufferError::ClearValueMismatch { location } => write!(
                f,
                "the clear value for attachment {} does not match its load op or format",
                location
            ),
            FramebufferError::Backend(err) => write!(f, "{}", err),
        }
    }
}

impl error::Error for FramebufferError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            FramebufferError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackendError> for FramebufferError {
    fn from(err: BackendError) -> Self {
        FramebufferError::Backend(err)
    }
}

/// A set of attachments validated against a [`FramebufferLayout`], backed
/// lazily by native render-pass and framebuffer objects.
#[derive(Debug)]
pub struct Framebuffer {
    device: Device,
    layout: FramebufferLayout,
    attachments: BTreeMap<u32, Attachment>,
    render_pass: Option<RenderPassHandle>,
    handle: Option<FramebufferHandle>,
    // Clear values in location order, rebuilt when attachments change.
    clear_values: Option<Vec<ClearValue>>,
}

impl Framebuffer {
    pub fn new(device: Device, layout: FramebufferLayout) -> Self {
        Framebuffer {
            device,
            layout,
            attachments: BTreeMap::new(),
            render_pass: None,
            handle: None,
            clear_values: None,
        }
    }

    pub fn layout(&self) -> &FramebufferLayout {
        &self.layout
    }

    pub fn extent(&self) -> [u32; 2] {
        self.layout.extent
    }

    /// Whether every location of the layout has an attachment.
    pub fn is_complete(&self) -> bool {
        self.attachments.len() == self.layout.attachments.len()
    }

    /// Attaches `attachment` at `location`, validating it against the
    /// layout.
    ///
    /// The attach that fills the last empty location builds the native
    /// objects immediately. Re-attaching an identical attachment is a
    /// no-op. Changing only the clear value keeps the native framebuffer;
    /// changing the view retires it for deferred destruction and rebuilds
    /// on the next [`update`].
    ///
    /// [`update`]: Framebuffer::update
    pub fn attach(&mut self, location: u32, attachment: Attachment) -> Result<(), FramebufferError> {
        let expected = self
            .layout
            .attachments
            .get(&location)
            .ok_or(FramebufferError::InvalidAttachmentLocation { location })?;

        if attachment.format != expected.format {
            return Err(FramebufferError::AttachmentFormatMismatch {
                location,
                expected: expected.format,
                provided: attachment.format,
            });
        }
        match (&attachment.clear_value, expected.clears_on_load()) {
            (Some(clear), true) => {
                if clear.is_depth_stencil() != expected.is_depth() {
                    return Err(FramebufferError::ClearValueMismatch { location });
                }
            }
            (None, true) | (Some(_), false) => {
                return Err(FramebufferError::ClearValueMismatch { location });
            }
            (None, false) => {}
        }

        match self.attachments.get(&location) {
            Some(current) if *current == attachment => return Ok(()),
            Some(current) if current.view == attachment.view => {
                // Same image, new clear value: the native object is still
                // valid, only the cached clear list is stale.
                self.clear_values = None;
            }
            Some(_) => {
                if let Some(handle) = self.handle.take() {
                    self.device.retire(RetiredResource::Framebuffer(handle));
                }
                self.clear_values = None;
            }
            None => self.clear_values = None,
        }
        let fills_last_location = !self.attachments.contains_key(&location)
            && self.attachments.len() + 1 == self.layout.attachments.len();
        self.attachments.insert(location, attachment);
        if fills_last_location {
            self.update()?;
        }
        Ok(())
    }

    /// Builds whatever native state is missing. A no-op until the
    /// framebuffer is complete, and afterwards whenever nothing changed.
    pub fn update(&mut self) -> Result<(), FramebufferError> {
        if !self.is_complete() {
            return Ok(());
        }
        let backend = self.device.backend();

        let render_pass = match self.render_pass {
            Some(render_pass) => render_pass,
            None => {
                let render_pass = backend.create_render_pass(&self.layout.render_pass_desc())?;
                self.render_pass = Some(render_pass);
                render_pass
            }
        };
        if self.handle.is_none() {
            let views: Vec<ImageViewHandle> =
                self.attachments.values().map(|a| a.view).collect();
            self.handle =
                Some(backend.create_framebuffer(render_pass, &views, self.layout.extent)?);
        }
        if self.clear_values.is_none() {
            // Locations that do not clear contribute a placeholder so the
            // list stays index-aligned with the attachments.
            self.clear_values = Some(
                self.attachments
                    .values()
                    .map(|a| {
                        a.clear_value
                            .unwrap_or(ClearValue::ColorF32([0.0; 4]))
                    })
                    .collect(),
            );
        }
        Ok(())
    }

    /// The native framebuffer, if built.
    pub fn handle(&self) -> Option<FramebufferHandle> {
        self.handle
    }

    /// The render pass the native framebuffer was built against, if built.
    pub fn render_pass_handle(&self) -> Option<RenderPassHandle> {
        self.render_pass
    }

    /// Clear values in location order; empty until [`update`] has built
    /// native state.
    ///
    /// [`update`]: Framebuffer::update
    pub fn clear_values(&self) -> &[ClearValue] {
        self.clear_values.as_deref().unwrap_or(&[])
    }

    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: self.layout.extent[0],
                height: self.layout.extent[1],
            },
        }
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.retire(RetiredResource::Framebuffer(handle));
        }
        if let Some(render_pass) = self.render_pass.take() {
            self.device.retire(RetiredResource::RenderPass(render_pass));
        }
    }
}
