use crate::error::{FrameGraphError, Result};
use crate::handle::{Handle, ResourceSlot};
use crate::render_target::{RenderPassInfo, RenderTargetData};
use crate::resource::{Resource, ResourceEntry, VirtualResource};

/// What a pass's execute closure sees: the concrete objects behind the handles it
/// declared during setup.
pub struct FrameGraphResources<'a> {
    pass: &'a str,
    declared: &'a [u16],
    slots: &'a [ResourceSlot],
    resources: &'a [Box<dyn VirtualResource>],
    render_targets: &'a [RenderTargetData],
}

impl<'a> FrameGraphResources<'a> {
    pub(crate) fn new(
        pass: &'a str,
        declared: &'a [u16],
        slots: &'a [ResourceSlot],
        resources: &'a [Box<dyn VirtualResource>],
        render_targets: &'a [RenderTargetData],
    ) -> Self {
        Self {
            pass,
            declared,
            slots,
            resources,
            render_targets,
        }
    }

    pub fn pass_name(&self) -> &str {
        self.pass
    }

    /// Concrete resource behind `handle`.
    ///
    /// # Panics
    ///
    /// If the pass did not declare the resource, or on any error [`try_get`](Self::try_get)
    /// reports.
    pub fn get<R: Resource>(&self, handle: Handle<R>) -> &'a R {
        self.try_get(handle).unwrap_or_else(|error| panic!("{error}"))
    }

    pub fn try_get<R: Resource>(&self, handle: Handle<R>) -> Result<&'a R> {
        let entry = self.entry(handle)?;
        entry
            .concrete
            .as_ref()
            .ok_or_else(|| FrameGraphError::ResourceNotResolved {
                pass: self.pass.to_string(),
                resource: entry.info().name.clone(),
            })
    }

    pub fn descriptor<R: Resource>(&self, handle: Handle<R>) -> &'a R::Descriptor {
        match self.entry(handle) {
            Ok(entry) => &entry.descriptor,
            Err(error) => panic!("{error}"),
        }
    }

    pub fn sub_resource_descriptor<R: Resource>(
        &self,
        handle: Handle<R>,
    ) -> &'a R::SubResourceDescriptor {
        match self.entry(handle) {
            Ok(entry) => &entry.sub_descriptor,
            Err(error) => panic!("{error}"),
        }
    }

    /// Union of every usage declared on the resource, i.e. what it was created with.
    pub fn usage<R: Resource>(&self, handle: Handle<R>) -> R::Usage {
        match self.entry(handle) {
            Ok(entry) => entry.usage,
            Err(error) => panic!("{error}"),
        }
    }

    /// Target and load/store parameters for a render target the pass declared.
    pub fn render_pass_info(&self, id: u32) -> RenderPassInfo {
        let data = self.render_targets.get(id as usize).and_then(|data| {
            data.target.map(|target| RenderPassInfo {
                target,
                params: data.params,
            })
        });
        match data {
            Some(info) => info,
            None => panic!(
                "{}",
                FrameGraphError::RenderTargetNotFound {
                    pass: self.pass.to_string(),
                    id,
                }
            ),
        }
    }

    fn entry<R: Resource>(&self, handle: Handle<R>) -> Result<&'a ResourceEntry<R>> {
        let resources: &'a [Box<dyn VirtualResource>] = self.resources;
        let slot = self
            .slots
            .get(handle.index() as usize)
            .ok_or(FrameGraphError::UnknownHandle {
                handle: handle.raw(),
            })?;
        let resource = &resources[slot.resource as usize];
        if !self.declared.contains(&handle.index()) {
            return Err(FrameGraphError::UndeclaredResource {
                pass: self.pass.to_string(),
                resource: resource.info().name.clone(),
            });
        }
        resource
            .as_any()
            .downcast_ref::<ResourceEntry<R>>()
            .ok_or(FrameGraphError::TypeMismatch {
                handle: handle.raw(),
                expected: R::KIND,
            })
    }
}
