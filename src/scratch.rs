//! Scratch-file persistence for `REMLSetup` values (spec §5: "paged out to
//! scratch when memory pressure requires it, and reloaded on demand").
//!
//! Each slice's grid of setups is packed into one file: a fixed header
//! followed by each occupied cell's banded Cholesky factor and QR factors,
//! all as IEEE 754 double-precision little-endian values.

use crate::banded::{Banded, BandedChol};
use crate::error::{Result, VoxRemlError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use std::io::{Read, Seek, SeekFrom, Write};

const MAGIC: u32 = 0x564f_584c; // "VOXL"
const VERSION: u32 = 1;

/// Fixed-size header written at the start of every scratch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchHeader {
    pub slice_index: u32,
    pub n: u32,
    pub m: u32,
    pub bandwidth: u32,
    pub cell_count: u32,
}

impl ScratchHeader {
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(MAGIC)?;
        w.write_u32::<LittleEndian>(VERSION)?;
        w.write_u32::<LittleEndian>(self.slice_index)?;
        w.write_u32::<LittleEndian>(self.n)?;
        w.write_u32::<LittleEndian>(self.m)?;
        w.write_u32::<LittleEndian>(self.bandwidth)?;
        w.write_u32::<LittleEndian>(self.cell_count)?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(VoxRemlError::ResourceExhausted(
                "scratch file has an invalid magic number".into(),
            ));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(VoxRemlError::ResourceExhausted(format!(
                "scratch file version {version} is not supported (expected {VERSION})"
            )));
        }
        Ok(ScratchHeader {
            slice_index: r.read_u32::<LittleEndian>()?,
            n: r.read_u32::<LittleEndian>()?,
            m: r.read_u32::<LittleEndian>()?,
            bandwidth: r.read_u32::<LittleEndian>()?,
            cell_count: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// One (a,b) cell's factors, packed in the order the driver needs them
/// reloaded: the banded Cholesky factor's raw buffer, then Q, then R_qr.
pub struct ScratchCell {
    pub ai: u32,
    pub bi: u32,
    pub chol_buf: Vec<f64>,
    pub q: Array2<f64>,
    pub r_qr: Array2<f64>,
}

/// Write a full slice's occupied cells to `w`. `cells` pairs each cell's
/// grid index with its packed factors.
pub fn write_slice<W: Write + Seek>(
    w: &mut W,
    header: ScratchHeader,
    cells: &[ScratchCell],
) -> Result<()> {
    w.seek(SeekFrom::Start(0))?;
    header.write_to(w)?;
    for cell in cells {
        w.write_u32::<LittleEndian>(cell.ai)?;
        w.write_u32::<LittleEndian>(cell.bi)?;
        for &v in &cell.chol_buf {
            w.write_f64::<LittleEndian>(v)?;
        }
        write_matrix(w, &cell.q)?;
        write_matrix(w, &cell.r_qr)?;
    }
    Ok(())
}

fn write_matrix<W: Write>(w: &mut W, mat: &Array2<f64>) -> Result<()> {
    for &v in mat.iter() {
        w.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}

/// Read a previously written slice scratch file, reconstructing each cell's
/// [`BandedChol`] and QR factors.
pub fn read_slice<R: Read + Seek>(r: &mut R) -> Result<(ScratchHeader, Vec<ScratchCell>)> {
    r.seek(SeekFrom::Start(0))?;
    let header = ScratchHeader::read_from(r)?;
    let n = header.n as usize;
    let m = header.m as usize;
    let bw = header.bandwidth as usize;
    let buf_len = n * (bw + 1);

    let mut cells = Vec::with_capacity(header.cell_count as usize);
    for _ in 0..header.cell_count {
        let ai = r.read_u32::<LittleEndian>()?;
        let bi = r.read_u32::<LittleEndian>()?;
        let mut chol_buf = Vec::with_capacity(buf_len);
        for _ in 0..buf_len {
            chol_buf.push(r.read_f64::<LittleEndian>()?);
        }
        let q = read_matrix(r, n, m)?;
        let r_qr = read_matrix(r, m, m)?;
        cells.push(ScratchCell {
            ai,
            bi,
            chol_buf,
            q,
            r_qr,
        });
    }
    Ok((header, cells))
}

fn read_matrix<R: Read>(r: &mut R, rows: usize, cols: usize) -> Result<Array2<f64>> {
    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..(rows * cols) {
        data.push(r.read_f64::<LittleEndian>()?);
    }
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| VoxRemlError::DimensionMismatch(e.to_string()))
}

/// Reconstruct a [`BandedChol`] from a packed buffer written by
/// [`write_slice`] (the inverse of `Banded`'s internal row-major-by-band
/// layout).
pub fn chol_from_buf(n: usize, bw: usize, buf: Vec<f64>) -> BandedChol {
    BandedChol::from_raw(Banded::from_raw(n, bw, buf))
}
