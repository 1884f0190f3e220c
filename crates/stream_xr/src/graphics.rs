//! Graphics device side of the XR session
//!
//! The runtime names the adapter it composites on by LUID; the device has
//! to be created on that adapter. Every swapchain image gets a color render
//! target plus a depth buffer of identical shape.

use crate::{Extent2D, XrError};

/// `DXGI_FORMAT_B8G8R8A8_UNORM_SRGB`
pub const COLOR_FORMAT: u32 = 91;
/// `DXGI_FORMAT_R32_TYPELESS`, backing store of the depth buffer
pub const DEPTH_TYPELESS_FORMAT: u32 = 39;
/// `DXGI_FORMAT_D32_FLOAT`, the depth view over the typeless buffer
pub const DEPTH_VIEW_FORMAT: u32 = 40;

/// Locally unique adapter identifier (8 bytes, low part first)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AdapterLuid([u8; 8]);

impl AdapterLuid {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Build from the `LowPart` / `HighPart` halves of a Windows `LUID`
    pub fn from_parts(low: u32, high: i32) -> Self {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&low.to_le_bytes());
        bytes[4..].copy_from_slice(&high.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl core::fmt::Display for AdapterLuid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let high = i32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]]);
        let low = u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        write!(f, "{:08X}:{:08X}", high, low)
    }
}

/// One enumerated graphics adapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterInfo {
    pub luid: AdapterLuid,
    pub description: String,
}

/// Index of the adapter whose LUID matches the runtime's requirement.
///
/// Adapters are compared in enumeration order; the first match wins.
pub fn select_adapter(adapters: &[AdapterInfo], required: AdapterLuid) -> Result<usize, XrError> {
    match adapters.iter().position(|a| a.luid == required) {
        Some(index) => {
            log::info!(
                "Using adapter {} ({}) for the runtime",
                index,
                adapters[index].description
            );
            Ok(index)
        }
        None => {
            log::error!(
                "None of {} adapters matches runtime LUID {}",
                adapters.len(),
                required
            );
            Err(XrError::NoMatchingAdapter(required))
        }
    }
}

/// Shape of a 2D texture array
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: u32,
}

impl TextureDesc {
    /// Single-sample color target of `extent`
    pub fn color(extent: Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            format: COLOR_FORMAT,
        }
    }

    /// Depth buffer matching this color texture's shape
    pub fn depth(&self) -> Self {
        Self {
            format: DEPTH_TYPELESS_FORMAT,
            ..*self
        }
    }

    pub fn extent(&self) -> Extent2D {
        Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// View dimension covering every slice and sample of this texture
    pub fn view_dimension(&self) -> ViewDimension {
        match (self.sample_count > 1, self.array_size > 1) {
            (false, false) => ViewDimension::Texture2D,
            (false, true) => ViewDimension::Texture2DArray,
            (true, false) => ViewDimension::Texture2DMs,
            (true, true) => ViewDimension::Texture2DMsArray,
        }
    }
}

/// How a render target or depth view addresses its texture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDimension {
    Texture2D,
    Texture2DArray,
    /// Multisampled
    Texture2DMs,
    Texture2DMsArray,
}

/// Creates the render targets for swapchain images
pub trait GraphicsBinding {
    /// Color render target + depth buffer for one image
    type ViewPair;
    /// Native swapchain image handle
    type Image;

    /// Build the target pair for `image`, described by `desc`
    fn make_view_pair(&self, image: &Self::Image, desc: &TextureDesc)
        -> Result<Self::ViewPair, XrError>;
}

/// View pairs of one swapchain, indexed by image
#[derive(Debug)]
pub struct SwapchainTargets<P> {
    desc: TextureDesc,
    pairs: Vec<P>,
}

impl<P> SwapchainTargets<P> {
    /// Build a view pair for every image the swapchain enumerated
    pub fn build<B>(binding: &B, images: &[B::Image], desc: TextureDesc) -> Result<Self, XrError>
    where
        B: GraphicsBinding<ViewPair = P>,
    {
        let pairs = images
            .iter()
            .map(|image| binding.make_view_pair(image, &desc))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { desc, pairs })
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn extent(&self) -> Extent2D {
        self.desc.extent()
    }

    pub fn get(&self, image: u32) -> Option<&P> {
        self.pairs.get(image as usize)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// A swapchain handle together with the view pairs over its images.
///
/// The view pairs reference the swapchain's textures and are released
/// first, both by [`release`](Self::release) and by an implicit drop.
#[derive(Debug)]
pub struct BoundSwapchain<H, P> {
    // Field order is drop order: targets before the handle
    targets: SwapchainTargets<P>,
    handle: H,
}

impl<H, P> BoundSwapchain<H, P> {
    pub fn new(handle: H, targets: SwapchainTargets<P>) -> Self {
        Self { targets, handle }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    pub fn targets(&self) -> &SwapchainTargets<P> {
        &self.targets
    }

    /// Release every view pair, then destroy the swapchain
    pub fn release(self) {
        let Self { targets, handle } = self;
        drop(targets);
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(low: u32, name: &str) -> AdapterInfo {
        AdapterInfo {
            luid: AdapterLuid::from_parts(low, 0),
            description: name.to_string(),
        }
    }

    #[test]
    fn test_select_matching_adapter() {
        let adapters = [adapter(0x10, "Basic Render"), adapter(0x2f, "Discrete GPU")];
        let index = select_adapter(&adapters, AdapterLuid::from_parts(0x2f, 0)).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_no_matching_adapter() {
        let adapters = [adapter(0x10, "Basic Render")];
        let required = AdapterLuid::from_parts(0x99, 1);
        match select_adapter(&adapters, required) {
            Err(XrError::NoMatchingAdapter(luid)) => assert_eq!(luid, required),
            other => panic!("unexpected {:?}", other),
        }
        assert!(select_adapter(&[], required).is_err());
    }

    #[test]
    fn test_luid_layout() {
        let luid = AdapterLuid::from_parts(0x0403_0201, 0x0807_0605);
        assert_eq!(luid.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(luid.to_string(), "08070605:04030201");
    }

    #[test]
    fn test_depth_matches_color_shape() {
        let color = TextureDesc {
            array_size: 2,
            sample_count: 4,
            ..TextureDesc::color(Extent2D { width: 1440, height: 1584 })
        };
        let depth = color.depth();

        assert_eq!(depth.width, color.width);
        assert_eq!(depth.height, color.height);
        assert_eq!(depth.array_size, 2);
        assert_eq!(depth.mip_levels, color.mip_levels);
        assert_eq!(depth.sample_count, 4);
        assert_eq!(depth.format, DEPTH_TYPELESS_FORMAT);
        assert_eq!(color.format, COLOR_FORMAT);
    }

    #[test]
    fn test_view_dimension_follows_shape() {
        let single = TextureDesc::color(Extent2D { width: 4, height: 4 });
        assert_eq!(single.view_dimension(), ViewDimension::Texture2D);

        let array = TextureDesc { array_size: 2, ..single };
        assert_eq!(array.view_dimension(), ViewDimension::Texture2DArray);

        let msaa = TextureDesc { sample_count: 4, ..single };
        assert_eq!(msaa.view_dimension(), ViewDimension::Texture2DMs);
        assert_eq!(msaa.depth().view_dimension(), ViewDimension::Texture2DMs);

        let both = TextureDesc { sample_count: 4, array_size: 2, ..single };
        assert_eq!(both.view_dimension(), ViewDimension::Texture2DMsArray);
    }

    struct Counting;

    impl GraphicsBinding for Counting {
        type ViewPair = (u32, TextureDesc);
        type Image = u32;

        fn make_view_pair(&self, image: &u32, desc: &TextureDesc) -> Result<Self::ViewPair, XrError> {
            if *image == 99 {
                return Err(XrError::DeviceCreation("bad image".into()));
            }
            Ok((*image, desc.depth()))
        }
    }

    #[test]
    fn test_targets_per_image() {
        let desc = TextureDesc::color(Extent2D { width: 64, height: 32 });
        let targets = SwapchainTargets::build(&Counting, &[7, 8, 9], desc).unwrap();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets.get(2).map(|p| p.0), Some(9));
        assert!(targets.get(3).is_none());
        assert_eq!(targets.extent(), Extent2D { width: 64, height: 32 });
    }

    #[test]
    fn test_targets_propagate_failure() {
        let desc = TextureDesc::color(Extent2D { width: 1, height: 1 });
        assert!(SwapchainTargets::build(&Counting, &[1, 99], desc).is_err());
    }

    type ReleaseLog = std::rc::Rc<std::cell::RefCell<Vec<String>>>;

    /// Records its own release into a shared log
    struct Tracked(&'static str, u32, ReleaseLog);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.2.borrow_mut().push(format!("{}:{}", self.0, self.1));
        }
    }

    struct TrackingBinding(ReleaseLog);

    impl GraphicsBinding for TrackingBinding {
        type ViewPair = Tracked;
        type Image = u32;

        fn make_view_pair(&self, image: &u32, _desc: &TextureDesc) -> Result<Tracked, XrError> {
            Ok(Tracked("view_pair", *image, self.0.clone()))
        }
    }

    fn bound(log: &ReleaseLog) -> BoundSwapchain<Tracked, Tracked> {
        let desc = TextureDesc::color(Extent2D { width: 8, height: 8 });
        let targets = SwapchainTargets::build(&TrackingBinding(log.clone()), &[0, 1], desc).unwrap();
        BoundSwapchain::new(Tracked("swapchain", 0, log.clone()), targets)
    }

    #[test]
    fn test_release_drops_view_pairs_before_swapchain() {
        let log = ReleaseLog::default();
        bound(&log).release();

        assert_eq!(*log.borrow(), ["view_pair:0", "view_pair:1", "swapchain:0"]);
    }

    #[test]
    fn test_implicit_drop_keeps_release_order() {
        let log = ReleaseLog::default();
        let mut swapchains = vec![bound(&log)];
        assert_eq!(swapchains[0].targets().len(), 2);
        swapchains.clear();

        assert_eq!(*log.borrow(), ["view_pair:0", "view_pair:1", "swapchain:0"]);
    }
}
