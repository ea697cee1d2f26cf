use std::fmt;

use bevy::log::{info, warn};
use bevy::render::render_resource::{
    Extent3d, Texture, TextureDescriptor, TextureDimension, TextureFormat,
    TextureFormatFeatureFlags, TextureUsages, TextureView, TextureViewDescriptor,
};
use bevy::render::renderer::{RenderAdapter, RenderDevice};
use glam::UVec2;

use crate::error::FluidError;
use crate::field::{GridFormat, GridHandle};

/// Half-float candidates per logical format, narrowest first.
pub fn candidates(format: GridFormat) -> &'static [TextureFormat] {
    match format {
        GridFormat::R => &[
            TextureFormat::R16Float,
            TextureFormat::Rg16Float,
            TextureFormat::Rgba16Float,
        ],
        GridFormat::Rg => &[TextureFormat::Rg16Float, TextureFormat::Rgba16Float],
        GridFormat::Rgba => &[TextureFormat::Rgba16Float],
    }
}

/// First candidate the device can both render into and filter from.
pub fn choose_format(
    format: GridFormat,
    supported: impl Fn(TextureFormat) -> bool,
) -> Result<TextureFormat, FluidError> {
    let options = candidates(format);
    let chosen = options
        .iter()
        .copied()
        .find(|f| supported(*f))
        .ok_or(FluidError::Capability { format })?;
    if chosen != options[0] {
        warn!("{format:?} grids fall back to {chosen:?}");
    }
    Ok(chosen)
}

/// Texture format actually used for each logical grid format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridFormats {
    pub r: TextureFormat,
    pub rg: TextureFormat,
    pub rgba: TextureFormat,
}

impl GridFormats {
    pub fn negotiate(adapter: &RenderAdapter) -> Result<Self, FluidError> {
        let supported = |format: TextureFormat| {
            let features = adapter.get_texture_format_features(format);
            features
                .allowed_usages
                .contains(TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING)
                && features.flags.contains(TextureFormatFeatureFlags::FILTERABLE)
        };
        let formats = Self::select(supported)?;
        info!("grid formats negotiated: {formats:?}");
        Ok(formats)
    }

    pub fn select(supported: impl Fn(TextureFormat) -> bool) -> Result<Self, FluidError> {
        Ok(Self {
            r: choose_format(GridFormat::R, &supported)?,
            rg: choose_format(GridFormat::Rg, &supported)?,
            rgba: choose_format(GridFormat::Rgba, &supported)?,
        })
    }

    pub fn get(&self, format: GridFormat) -> TextureFormat {
        match format {
            GridFormat::R => self.r,
            GridFormat::Rg => self.rg,
            GridFormat::Rgba => self.rgba,
        }
    }
}

/// A simulation grid living in a GPU texture. Equality is identity.
#[derive(Clone)]
pub struct GpuGrid {
    id: u32,
    size: UVec2,
    format: GridFormat,
    texture_format: TextureFormat,
    // keeps the allocation alive as long as any job still refers to it
    _texture: Texture,
    view: TextureView,
}

impl GpuGrid {
    pub fn create(
        device: &RenderDevice,
        id: u32,
        size: UVec2,
        format: GridFormat,
        texture_format: TextureFormat,
    ) -> Result<Self, FluidError> {
        let max = device.limits().max_texture_dimension_2d;
        if size.x == 0 || size.y == 0 || size.x > max || size.y > max {
            return Err(FluidError::Resource {
                width: size.x,
                height: size.y,
                format,
                reason: format!("texture dimensions must be within 1..={max}"),
            });
        }

        let texture = device.create_texture(&TextureDescriptor {
            label: Some("fluid_grid"),
            size: Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: texture_format,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());

        Ok(Self {
            id,
            size,
            format,
            texture_format,
            _texture: texture,
            view,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.texture_format
    }
}

impl PartialEq for GpuGrid {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for GpuGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuGrid")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("texture_format", &self.texture_format)
            .finish()
    }
}

impl GridHandle for GpuGrid {
    fn size(&self) -> UVec2 {
        self.size
    }

    fn format(&self) -> GridFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_support_keeps_narrow_formats() {
        let formats = GridFormats::select(|_| true).unwrap();
        assert_eq!(formats.r, TextureFormat::R16Float);
        assert_eq!(formats.rg, TextureFormat::Rg16Float);
        assert_eq!(formats.rgba, TextureFormat::Rgba16Float);
    }

    #[test]
    fn missing_formats_fall_back_to_wider_ones() {
        let formats = GridFormats::select(|f| f == TextureFormat::Rgba16Float).unwrap();
        assert_eq!(formats.get(GridFormat::R), TextureFormat::Rgba16Float);
        assert_eq!(formats.get(GridFormat::Rg), TextureFormat::Rgba16Float);

        let formats = GridFormats::select(|f| f != TextureFormat::R16Float).unwrap();
        assert_eq!(formats.r, TextureFormat::Rg16Float);
    }

    #[test]
    fn no_half_float_support_is_a_capability_error() {
        assert_eq!(
            GridFormats::select(|_| false),
            Err(FluidError::Capability {
                format: GridFormat::R
            })
        );
        assert_eq!(
            choose_format(GridFormat::Rgba, |f| f == TextureFormat::R16Float),
            Err(FluidError::Capability {
                format: GridFormat::Rgba
            })
        );
    }
}
