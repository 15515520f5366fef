//! The content-addressed framebuffer cache.
//!
//! Keyed by the full attachment array; built once per unique configuration
//! and shared thereafter. Destroying an attached view evicts every
//! framebuffer referencing it, via the back-reference lists the cache
//! maintains on the views.

use std::collections::HashMap;

use lattice_gl::{Attachment, DeviceCaps, GlDriver, NamePool, RawName};
use tracing::{debug, error, warn};

use crate::cache::CacheStats;
use crate::error::ContextError;
use crate::formats::FormatTable;
use crate::state::{refresh, StateMirror, MAX_RENDER_TARGETS};
use crate::table::Table;
use crate::views::{View, ViewCaps, ViewId, ViewKind};

/// Handle to a cached framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferId(pub(crate) u32);

/// One view handle per attachment slot. The cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameBufferConfig {
    pub colors: [Option<ViewId>; MAX_RENDER_TARGETS],
    pub depth: Option<ViewId>,
    pub stencil: Option<ViewId>,
}

impl FrameBufferConfig {
    fn attached_views(&self) -> Vec<ViewId> {
        let mut out: Vec<ViewId> = self
            .colors
            .iter()
            .copied()
            .flatten()
            .chain(self.depth)
            .chain(self.stencil)
            .collect();
        out.sort_by_key(|v| v.0);
        out.dedup();
        out
    }
}

/// A built native framebuffer.
#[derive(Debug)]
pub struct FrameBufferObject {
    pub(crate) name: RawName,
    pub(crate) config: FrameBufferConfig,
    /// Whether any color attachment uses an sRGB format.
    pub(crate) srgb: bool,
}

impl FrameBufferObject {
    pub fn name(&self) -> RawName {
        self.name
    }

    pub fn config(&self) -> &FrameBufferConfig {
        &self.config
    }

    pub fn srgb(&self) -> bool {
        self.srgb
    }
}

#[derive(Debug, Default)]
pub struct FrameBufferCache {
    by_config: HashMap<FrameBufferConfig, FrameBufferId>,
    objects: Table<FrameBufferObject>,
    pub stats: CacheStats,
}

impl FrameBufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FrameBufferId) -> Option<&FrameBufferObject> {
        self.objects.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.len() == 0
    }

    /// Looks up `config`, building and caching the native object on miss.
    pub(crate) fn allocate<D: GlDriver>(
        &mut self,
        driver: &mut D,
        mirror: &mut StateMirror,
        views: &mut Table<View>,
        names: &NamePool,
        caps: &DeviceCaps,
        formats: &FormatTable,
        config: &FrameBufferConfig,
    ) -> Result<FrameBufferId, ContextError> {
        if let Some(id) = self.by_config.get(config) {
            self.stats.hit();
            return Ok(*id);
        }
        self.stats.miss();

        fn attachment_of<'a>(
            views: &'a Table<View>,
            id: ViewId,
        ) -> Result<&'a View, ContextError> {
            let view = views.get(id.0).ok_or(ContextError::InvalidHandle { kind: "view" })?;
            if !view.caps.contains(ViewCaps::ATTACHMENT) {
                return Err(ContextError::Unsupported {
                    feature: "attaching a non-attachable view",
                });
            }
            Ok(view)
        }

        let name = driver.gen_framebuffer();
        if refresh(&mut mirror.draw_framebuffer, name) {
            driver.bind_draw_framebuffer(name);
        }

        // The draw-buffer mapping is per-object native state: emitted once
        // at build time, never re-emitted for the same object.
        let mut draw_mask = [None; MAX_RENDER_TARGETS];
        let mut srgb = false;
        let mut fail: Option<ContextError> = None;

        for (slot, color) in config.colors.iter().enumerate() {
            if slot >= caps.max_color_attachments as usize {
                if color.is_some() {
                    warn!(slot, "ignoring color attachment beyond device limit");
                }
                continue;
            }
            let Some(view_id) = color else { continue };
            match attachment_of(views, *view_id) {
                Ok(view) => {
                    let desc = formats.describe(view.format);
                    if !desc.color_renderable {
                        warn!(slot, "attaching a non-color-renderable format");
                    }
                    srgb |= desc.srgb;
                    attach(driver, names, view, Attachment::Color(slot as u32));
                    draw_mask[slot] = Some(slot as u32);
                }
                Err(e) => fail = Some(e),
            }
        }

        if fail.is_none() {
            match (config.depth, config.stencil) {
                (Some(depth), Some(stencil)) if depth == stencil => {
                    match attachment_of(views, depth) {
                        Ok(view) => attach(driver, names, view, Attachment::DepthStencil),
                        Err(e) => fail = Some(e),
                    }
                }
                (depth, stencil) => {
                    if let Some(depth) = depth {
                        match attachment_of(views, depth) {
                            Ok(view) => attach(driver, names, view, Attachment::Depth),
                            Err(e) => fail = Some(e),
                        }
                    }
                    if let Some(stencil) = stencil {
                        match attachment_of(views, stencil) {
                            Ok(view) => {
                                // Without stencil-only attachment support the
                                // view must carry a packed depth-stencil
                                // format and attaches combined.
                                let point = if caps.stencil_only_attachment {
                                    Attachment::Stencil
                                } else {
                                    warn!("no stencil-only attachments; attaching combined");
                                    Attachment::DepthStencil
                                };
                                attach(driver, names, view, point);
                            }
                            Err(e) => fail = Some(e),
                        }
                    }
                }
            }
        }

        if fail.is_none() {
            driver.draw_buffers(&draw_mask[..caps.max_color_attachments as usize]);
            if !driver.check_framebuffer_complete() {
                fail = Some(ContextError::IncompleteFrameBuffer);
            }
        }

        if let Some(err) = fail {
            driver.delete_framebuffer(name);
            if refresh(&mut mirror.draw_framebuffer, 0) {
                driver.bind_draw_framebuffer(0);
            }
            return Err(err);
        }

        let id = FrameBufferId(self.objects.insert(FrameBufferObject {
            name,
            config: *config,
            srgb,
        }));
        for view_id in config.attached_views() {
            // Attachment lookups above already validated these ids.
            if let Some(view) = views.get_mut(view_id.0) {
                view.attached_framebuffers.push(id);
            }
        }
        self.by_config.insert(*config, id);
        debug!(name, entries = self.objects.len(), "built framebuffer");
        Ok(id)
    }

    /// Evicts `id`, detaching it from every attached view's back-reference
    /// list except `invalidating_view` (the view currently being
    /// destroyed, whose list is about to disappear anyway).
    pub(crate) fn remove<D: GlDriver>(
        &mut self,
        driver: &mut D,
        mirror: &mut StateMirror,
        views: &mut Table<View>,
        id: FrameBufferId,
        invalidating_view: Option<ViewId>,
    ) {
        let Some(object) = self.objects.remove(id.0) else {
            debug_assert!(false, "removing a framebuffer not present in the cache");
            error!("removing a framebuffer not present in the cache");
            return;
        };
        self.by_config.remove(&object.config);

        for view_id in object.config.attached_views() {
            if Some(view_id) == invalidating_view {
                continue;
            }
            let Some(view) = views.get_mut(view_id.0) else { continue };
            let before = view.attached_framebuffers.len();
            view.attached_framebuffers.retain(|fb| *fb != id);
            if view.attached_framebuffers.len() == before {
                debug_assert!(false, "view was not attached to the framebuffer being removed");
                error!("view was not attached to the framebuffer being removed");
            }
        }

        if mirror.draw_framebuffer == object.name {
            mirror.draw_framebuffer = 0;
            driver.bind_draw_framebuffer(0);
        }
        driver.delete_framebuffer(object.name);
    }
}

fn attach<D: GlDriver>(driver: &mut D, names: &NamePool, view: &View, point: Attachment) {
    match view.kind {
        ViewKind::Texture { level, layer, .. } => {
            driver.framebuffer_texture(point, names.raw(view.handle), level, layer);
        }
        ViewKind::Buffer { .. } => {
            warn!("buffer-backed view cannot attach to a framebuffer; skipping");
        }
    }
}
