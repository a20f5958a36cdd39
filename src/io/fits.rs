//! FITS image read/write.
//!
//! Only the primary HDU is used. Images are 2D (a leading axis of length 1
//! is accepted and dropped). The physical coordinate mapping is read from
//! the `LTV1/LTV2/LTM1_1/LTM2_2` keywords when present.

use std::path::Path;

use fitsio::FitsFile;
use fitsio::errors::Error as FitsIoError;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};

use crate::domain::{Image, PhysicalTransform};
use crate::error::AppError;

/// Read the primary HDU of a FITS file as a 2D image.
pub fn read_image(path: &Path) -> Result<Image, AppError> {
    let mut fptr = FitsFile::open(path)
        .map_err(|e| AppError::input(format!("Failed to open FITS file '{}': {e}", path.display())))?;
    let hdu = fptr
        .primary_hdu()
        .map_err(|e| AppError::input(format!("Failed to access primary HDU of '{}': {e}", path.display())))?;

    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        HduInfo::TableInfo { .. } => {
            return Err(AppError::input(format!("Primary HDU of '{}' is a table, not an image.", path.display())));
        }
        HduInfo::AnyInfo => {
            return Err(AppError::input(format!("Unknown HDU type in '{}'.", path.display())));
        }
    };

    // fitsio reports the shape slowest axis first: [NAXIS2, NAXIS1].
    let (ny, nx) = match shape.as_slice() {
        [ny, nx] => (*ny, *nx),
        [1, ny, nx] => (*ny, *nx),
        other => {
            return Err(AppError::input(format!(
                "FITS image '{}' must be 2D (shape {other:?}).",
                path.display()
            )));
        }
    };
    if nx == 0 || ny == 0 {
        return Err(AppError::input(format!("FITS image '{}' is empty.", path.display())));
    }

    let data: Vec<f64> = hdu
        .read_image(&mut fptr)
        .map_err(|e| AppError::input(format!("Failed to read image data from '{}': {e}", path.display())))?;
    if data.len() != nx * ny {
        return Err(AppError::input(format!(
            "FITS image '{}' has {} pixels, expected {}.",
            path.display(),
            data.len(),
            nx * ny
        )));
    }

    let defaults = PhysicalTransform::default();
    let transform = PhysicalTransform {
        ltv1: read_key_or(path, &hdu, &mut fptr, "LTV1", defaults.ltv1)?,
        ltv2: read_key_or(path, &hdu, &mut fptr, "LTV2", defaults.ltv2)?,
        ltm1_1: read_key_or(path, &hdu, &mut fptr, "LTM1_1", defaults.ltm1_1)?,
        ltm2_2: read_key_or(path, &hdu, &mut fptr, "LTM2_2", defaults.ltm2_2)?,
    };
    if transform.ltm1_1 == 0.0 || transform.ltm2_2 == 0.0 {
        return Err(AppError::input(format!("FITS image '{}' has a zero LTM scale.", path.display())));
    }

    Ok(Image {
        nx,
        ny,
        data,
        transform,
    })
}

/// Write an image as a double-precision primary HDU, including the LTV/LTM keywords.
pub fn write_image(path: &Path, image: &Image) -> Result<(), AppError> {
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[image.ny, image.nx],
    };
    let err = |e: FitsIoError| AppError::input(format!("Failed to write FITS file '{}': {e}", path.display()));

    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .map_err(err)?;
    let hdu = fptr.primary_hdu().map_err(err)?;
    hdu.write_image(&mut fptr, &image.data).map_err(err)?;

    let t = image.transform;
    hdu.write_key(&mut fptr, "LTV1", t.ltv1).map_err(err)?;
    hdu.write_key(&mut fptr, "LTV2", t.ltv2).map_err(err)?;
    hdu.write_key(&mut fptr, "LTM1_1", t.ltm1_1).map_err(err)?;
    hdu.write_key(&mut fptr, "LTM2_2", t.ltm2_2).map_err(err)?;
    Ok(())
}

/// cfitsio status for a keyword that is not in the header.
const KEY_NO_EXIST: i32 = 202;

/// Read a numeric keyword; only a missing keyword falls back to `default`.
fn read_key_or(path: &Path, hdu: &FitsHdu, fptr: &mut FitsFile, key: &str, default: f64) -> Result<f64, AppError> {
    match hdu.read_key::<f64>(fptr, key) {
        Ok(value) => Ok(value),
        Err(FitsIoError::Fits(e)) if e.status == KEY_NO_EXIST => Ok(default),
        Err(e) => Err(AppError::input(format!(
            "Invalid header keyword '{key}' in '{}': {e}",
            path.display()
        ))),
    }
}
