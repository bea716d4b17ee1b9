//! Ingestion of lattice corner samples and per-cell type values
//!
//! A single rank reads the binary input in fixed chunks and broadcasts each
//! chunk; every rank filters out the samples touching cells it owns. One
//! corner sample fans out into up to eight (3D) or four (2D) cells, so the
//! cost per rank is linear in the number of samples and independent of the
//! number of ranks.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error as ThisError;

use crate::comm::Communicator;
use crate::grid::{Dimension, GridIndex};
use crate::{new_map, Index, MapType, Real};

/// Number of samples read and broadcast per chunk
const CHUNK: usize = 8192;

/// Error enum for corner-value and type-value ingestion
#[derive(Debug, ThisError)]
pub enum IngestError {
    /// The corner or type file could not be opened on the reader rank
    #[error("cannot open input file {path:?}")]
    OpenFailure {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },
    /// Reading from the input file failed mid-stream on the reader rank
    #[error("failed reading input file {path:?}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },
    /// The extents in the file header disagree with the requested block
    #[error("grid size in input file header {found:?} does not match request {expected:?}")]
    ExtentMismatch {
        expected: [i32; 3],
        found: [i32; 3],
    },
    /// A corner sample on the outer boundary of the lattice is not zero
    #[error("boundary corner value {value} != 0 at lattice point ({ix}, {iy}, {iz})")]
    BoundaryNotZero {
        value: u8,
        ix: usize,
        iy: usize,
        iz: usize,
    },
}

/// Per-cell corner samples (and optional type values) of the owned cells
///
/// Corner slot `k` of a cell uses the `zyx` bit encoding with x fastest:
/// bit 0 selects the high-x corner, bit 1 high-y, bit 2 high-z. 2D cells use
/// the first four slots.
#[derive(Clone, Debug)]
pub struct CornerField {
    dimension: Dimension,
    stride: usize,
    values: Vec<u8>,
    types: Option<Vec<i32>>,
}

impl CornerField {
    /// Constructs a zeroed field for the given number of owned cells
    pub fn new(dimension: Dimension, num_cells: usize) -> Self {
        let stride = dimension.corners_per_cell();
        Self {
            dimension,
            stride,
            values: vec![0; num_cells * stride],
            types: None,
        }
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn num_cells(&self) -> usize {
        self.values.len() / self.stride
    }

    /// The corner samples of one cell
    #[inline(always)]
    pub fn corners(&self, cell: usize) -> &[u8] {
        &self.values[cell * self.stride..(cell + 1) * self.stride]
    }

    #[inline(always)]
    pub fn set_corner(&mut self, cell: usize, corner: usize, value: u8) {
        self.values[cell * self.stride + corner] = value;
    }

    /// Material label of one cell: its type value, or 1 without a type map
    #[inline(always)]
    pub fn label(&self, cell: usize) -> i32 {
        self.types.as_ref().map(|t| t[cell]).unwrap_or(1)
    }
}

/// Hash from linear block index to local cell index for all owned cells
pub(crate) fn build_cell_hash<I: Index, R: Real, G: GridIndex<I, R>>(
    grid: &G,
) -> MapType<u64, usize> {
    let block = grid.block();
    let mut hash = new_map();
    for cell in 0..grid.num_cells() {
        let [ix, iy, iz] = block.cell_index_of(grid.cell_bounds(cell).min());
        hash.insert(block.flatten_cell_index(ix, iy, iz), cell);
    }
    hash
}

/// Reads all lattice corner samples into a fresh [`CornerField`]
///
/// The file carries `dim` little-endian `i32` extents `(nx+1, ny+1[, nz+1])`
/// followed by one unsigned byte per lattice point, x fastest. Collective:
/// every rank must call this.
pub fn read_corners<I: Index, R: Real, G: GridIndex<I, R>, C: Communicator>(
    path: &Path,
    grid: &G,
    comm: &C,
    cell_hash: &MapType<u64, usize>,
) -> Result<CornerField, IngestError> {
    let dimension = grid.dimension();
    let [nx, ny, nz] = grid.block().dims();

    let expected = match dimension {
        Dimension::Two => [nx as i32 + 1, ny as i32 + 1, 1],
        Dimension::Three => [nx as i32 + 1, ny as i32 + 1, nz as i32 + 1],
    };

    let mut reader = FileBroadcast::open(path, comm, dimension, expected)?;

    let num_corners = match dimension {
        Dimension::Two => (nx as u64 + 1) * (ny as u64 + 1),
        Dimension::Three => (nx as u64 + 1) * (ny as u64 + 1) * (nz as u64 + 1),
    };

    let mut field = CornerField::new(dimension, grid.num_cells());

    let mut offset = 0u64;
    while offset < num_corners {
        let nchunk = CHUNK.min((num_corners - offset) as usize);
        let chunk = reader.next_chunk(nchunk)?;
        assign_corners(&mut field, cell_hash, grid, offset, chunk)?;
        offset += nchunk as u64;
    }

    if comm.rank() == 0 {
        info!("Read {} corner points from {:?}", num_corners, path);
    }

    Ok(field)
}

/// Reads one `i32` type value per cell of the block into the corner field
///
/// The file carries `dim` little-endian `i32` extents `(nx, ny[, nz])`
/// followed by one `i32` per cell, x fastest. Collective.
pub fn read_types<I: Index, R: Real, G: GridIndex<I, R>, C: Communicator>(
    path: &Path,
    grid: &G,
    comm: &C,
    cell_hash: &MapType<u64, usize>,
    field: &mut CornerField,
) -> Result<(), IngestError> {
    let dimension = grid.dimension();
    let [nx, ny, nz] = grid.block().dims();

    let expected = match dimension {
        Dimension::Two => [nx as i32, ny as i32, 1],
        Dimension::Three => [nx as i32, ny as i32, nz as i32],
    };

    let mut reader = FileBroadcast::open(path, comm, dimension, expected)?;

    let num_types = nx as u64 * ny as u64 * nz as u64;
    let mut types = vec![0i32; grid.num_cells()];

    let mut offset = 0u64;
    while offset < num_types {
        let nchunk = CHUNK.min((num_types - offset) as usize);
        let chunk = reader.next_chunk(nchunk * 4)?;
        for (i, value) in chunk.chunks_exact(4).enumerate() {
            let cell_index = offset + i as u64;
            if let Some(&cell) = cell_hash.get(&cell_index) {
                types[cell] = i32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            }
        }
        offset += nchunk as u64;
    }

    if comm.rank() == 0 {
        info!("Read {} surface types from {:?}", num_types, path);
    }

    field.types = Some(types);
    Ok(())
}

/// Stores one broadcast chunk of corner samples into the owned cells sharing them
fn assign_corners<I: Index, R: Real, G: GridIndex<I, R>>(
    field: &mut CornerField,
    cell_hash: &MapType<u64, usize>,
    grid: &G,
    offset: u64,
    buf: &[u8],
) -> Result<(), IngestError> {
    let block = grid.block();
    let [nx, ny, nz] = block.dims();
    let three_d = field.dimension().is_three();

    for (i, &value) in buf.iter().enumerate() {
        let point_index = offset + i as u64;
        let pix = (point_index % (nx as u64 + 1)) as usize;
        let piy = ((point_index / (nx as u64 + 1)) % (ny as u64 + 1)) as usize;
        let piz = (point_index / ((nx as u64 + 1) * (ny as u64 + 1))) as usize;

        if value != 0 {
            let mut on_boundary = pix == 0 || piy == 0 || pix == nx || piy == ny;
            if three_d {
                on_boundary = on_boundary || piz == 0 || piz == nz;
            }
            if on_boundary {
                return Err(IngestError::BoundaryNotZero {
                    value,
                    ix: pix,
                    iy: piy,
                    iz: piz,
                });
            }
        }

        // Corner slot k of a cell receives this sample when the cell sits at
        // offset (-1, 0) of the point along each axis; walking the candidate
        // cells in ascending z, y, x order counts the slots down from the
        // high corner to the low corner.
        let (pix, piy, piz) = (pix as i64, piy as i64, piz as i64);
        if three_d {
            let mut corner = 8usize;
            for ciz in piz - 1..=piz {
                for ciy in piy - 1..=piy {
                    for cix in pix - 1..=pix {
                        corner -= 1;
                        if cix < 0
                            || cix >= nx as i64
                            || ciy < 0
                            || ciy >= ny as i64
                            || ciz < 0
                            || ciz >= nz as i64
                        {
                            continue;
                        }
                        let cell_index =
                            block.flatten_cell_index(cix as usize, ciy as usize, ciz as usize);
                        if let Some(&cell) = cell_hash.get(&cell_index) {
                            field.set_corner(cell, corner, value);
                        }
                    }
                }
            }
        } else {
            let mut corner = 4usize;
            for ciy in piy - 1..=piy {
                for cix in pix - 1..=pix {
                    corner -= 1;
                    if cix < 0 || cix >= nx as i64 || ciy < 0 || ciy >= ny as i64 {
                        continue;
                    }
                    let cell_index = block.flatten_cell_index(cix as usize, ciy as usize, 0);
                    if let Some(&cell) = cell_hash.get(&cell_index) {
                        field.set_corner(cell, corner, value);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Chunked read-and-broadcast of a binary input file
///
/// Rank 0 owns the file handle. Every broadcast leads with a status byte
/// ([`STATUS_OK`] / [`STATUS_OPEN_FAILED`] / [`STATUS_READ_FAILED`]) so that
/// a bad or truncated file fails collectively on every rank instead of
/// leaving the non-reader ranks blocked in the broadcast.
struct FileBroadcast<'a, C: Communicator> {
    comm: &'a C,
    path: PathBuf,
    file: Option<File>,
    buf: Vec<u8>,
}

const STATUS_OPEN_FAILED: u8 = 0;
const STATUS_OK: u8 = 1;
const STATUS_READ_FAILED: u8 = 2;

impl<'a, C: Communicator> FileBroadcast<'a, C> {
    fn open(
        path: &Path,
        comm: &'a C,
        dimension: Dimension,
        expected: [i32; 3],
    ) -> Result<Self, IngestError> {
        let header_len = dimension.header_len();

        let mut file = None;
        let mut header = vec![STATUS_OPEN_FAILED; 1 + header_len * 4];
        let mut io_error = None;

        if comm.rank() == 0 {
            match File::open(path) {
                Ok(mut f) => match f.read_exact(&mut header[1..]) {
                    Ok(()) => {
                        header[0] = STATUS_OK;
                        file = Some(f);
                    }
                    Err(source) => {
                        header[0] = STATUS_READ_FAILED;
                        io_error = Some(source);
                    }
                },
                Err(source) => {
                    header[0] = STATUS_OPEN_FAILED;
                    io_error = Some(source);
                }
            }
        }

        comm.broadcast(0, &mut header);

        match header[0] {
            STATUS_OK => {}
            STATUS_OPEN_FAILED => {
                return Err(IngestError::OpenFailure {
                    path: path.to_owned(),
                    source: io_error,
                });
            }
            _ => {
                return Err(IngestError::ReadFailure {
                    path: path.to_owned(),
                    source: io_error,
                });
            }
        }

        let mut found = [1i32; 3];
        for (d, value) in header[1..].chunks_exact(4).enumerate() {
            found[d] = i32::from_le_bytes([value[0], value[1], value[2], value[3]]);
        }

        if found[..header_len] != expected[..header_len] {
            return Err(IngestError::ExtentMismatch { expected, found });
        }

        Ok(Self {
            comm,
            path: path.to_owned(),
            file,
            buf: Vec::new(),
        })
    }

    /// Reads the next `len` bytes on rank 0 and broadcasts them to all ranks,
    /// leading with the read status
    fn next_chunk(&mut self, len: usize) -> Result<&[u8], IngestError> {
        self.buf.clear();
        self.buf.resize(1 + len, STATUS_READ_FAILED);
        let mut io_error = None;
        if let Some(file) = self.file.as_mut() {
            match file.read_exact(&mut self.buf[1..]) {
                Ok(()) => self.buf[0] = STATUS_OK,
                Err(source) => {
                    self.buf[0] = STATUS_READ_FAILED;
                    io_error = Some(source);
                }
            }
        }
        self.comm.broadcast(0, &mut self.buf);
        if self.buf[0] != STATUS_OK {
            return Err(IngestError::ReadFailure {
                path: self.path.clone(),
                source: io_error,
            });
        }
        Ok(&self.buf[1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::grid::UniformBlockIndex;
    use nalgebra::Vector3;
    use std::io::Write;

    fn write_corner_file(path: &Path, extents: &[i32], values: &[u8]) {
        let mut file = File::create(path).unwrap();
        for e in extents {
            file.write_all(&e.to_le_bytes()).unwrap();
        }
        file.write_all(values).unwrap();
    }

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("isoextract-corners-{}-{}", std::process::id(), name));
        path
    }

    fn serial_grid_2x1x1() -> UniformBlockIndex<i32, f64> {
        UniformBlockIndex::new_serial(
            Dimension::Three,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            [2, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_shared_corner_fans_out_to_all_cells() {
        let grid = UniformBlockIndex::<i32, f64>::new_serial(
            Dimension::Three,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            [2, 2, 2],
        )
        .unwrap();
        let comm = SerialComm;
        let hash = build_cell_hash(&grid);

        // 3 x 3 x 3 lattice points, x fastest; the single interior point
        // (1, 1, 1) is shared by all eight cells
        let mut values = vec![0u8; 27];
        values[13] = 200;

        let path = temp_path("fanout");
        write_corner_file(&path, &[3, 3, 3], &values);
        let field = read_corners(&path, &grid, &comm, &hash).unwrap();
        std::fs::remove_file(&path).ok();

        // Every cell stores the sample in the slot of the corner it shares:
        // the low cell sees it at its high corner and vice versa
        for cell in 0..8 {
            let expected_slot = 7 - cell;
            for slot in 0..8 {
                let expected = if slot == expected_slot { 200 } else { 0 };
                assert_eq!(field.corners(cell)[slot], expected);
            }
        }
    }

    #[test]
    fn test_boundary_corner_must_be_zero() {
        let grid = serial_grid_2x1x1();
        let comm = SerialComm;
        let hash = build_cell_hash(&grid);

        let mut values = vec![0u8; 12];
        values[0] = 42; // (0, 0, 0) is on the block boundary

        let path = temp_path("boundary");
        write_corner_file(&path, &[3, 2, 2], &values);
        let result = read_corners(&path, &grid, &comm, &hash);
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(IngestError::BoundaryNotZero { value: 42, .. })
        ));
    }

    #[test]
    fn test_extent_mismatch() {
        let grid = serial_grid_2x1x1();
        let comm = SerialComm;
        let hash = build_cell_hash(&grid);

        let path = temp_path("extent");
        write_corner_file(&path, &[4, 2, 2], &vec![0u8; 16]);
        let result = read_corners(&path, &grid, &comm, &hash);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(IngestError::ExtentMismatch { .. })));
    }

    #[test]
    fn test_missing_file() {
        let grid = serial_grid_2x1x1();
        let comm = SerialComm;
        let hash = build_cell_hash(&grid);

        let result = read_corners(Path::new("/nonexistent/corners.bin"), &grid, &comm, &hash);
        assert!(matches!(result, Err(IngestError::OpenFailure { .. })));
    }

    #[test]
    fn test_truncated_file_fails_with_read_error() {
        let grid = serial_grid_2x1x1();
        let comm = SerialComm;
        let hash = build_cell_hash(&grid);

        // the header promises 12 samples but the body holds only 3
        let path = temp_path("truncated");
        write_corner_file(&path, &[3, 2, 2], &[0, 0, 0]);
        let result = read_corners(&path, &grid, &comm, &hash);
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(IngestError::ReadFailure { .. })));
    }

    #[test]
    fn test_read_types() {
        let grid = serial_grid_2x1x1();
        let comm = SerialComm;
        let hash = build_cell_hash(&grid);

        let mut field = CornerField::new(Dimension::Three, grid.num_cells());
        assert_eq!(field.label(0), 1);

        let path = temp_path("types");
        let mut bytes = Vec::new();
        for e in [2i32, 1, 1] {
            bytes.extend_from_slice(&e.to_le_bytes());
        }
        for t in [7i32, -3] {
            bytes.extend_from_slice(&t.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();

        read_types(&path, &grid, &comm, &hash, &mut field).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(field.label(0), 7);
        assert_eq!(field.label(1), -3);
    }
}
