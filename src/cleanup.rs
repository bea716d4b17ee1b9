//! Shared-face reconciliation of the marching cubes output
//!
//! Marching cubes run independently on two cells sharing a face can put two
//! face-coplanar triangles on either side of the face, with normals pointing
//! into either cell. After this pass every interior face carries zero or two
//! triangles, attached to the single cell whose interior the normals point
//! into; faces claimed by both sides are cleared entirely. Faces between
//! cells of different ranks are reconciled through one bulk exchange.
//!
//! Triangle deletion is deferred: handles are unlinked from the cell lists
//! immediately, the pool is compacted once at the end in descending index
//! order with back-pointer repair through the owning cell's handle list.

use log::{debug, trace};
use thiserror::Error as ThisError;

use crate::comm::{Communicator, IrregularExchange};
use crate::grid::{CellId, GridIndex, NeighborRef};
use crate::surface::{normal_is_inward, tri_on_cell_face, GroupMask, SurfacePool, Tri};
use crate::topology::CellFace;
use crate::{Index, Real};

/// Error enum for the face-cleanup stage
#[derive(Debug, ThisError)]
pub enum CleanupError {
    /// Some cell face carries a triangle count other than zero or two
    #[error("{count} cell faces do not have zero or two triangles")]
    NonPairedFace { count: u64 },
    /// A paired face lies on the domain boundary or points at the cell itself
    #[error("invalid face neighbour of cell {cell} during cleanup")]
    InvalidNeighbor { cell: CellId },
    /// Bookkeeping inconsistency: a triangle handle vanished from its cell
    #[error("cell {cell} lost track of a bound triangle during cleanup")]
    MissingSurfOnCell { cell: CellId },
}

/// Per-face triangle tally of one cell
#[derive(Clone, Copy, Default)]
struct FaceTally {
    count: [u32; 6],
    tris: [[usize; 2]; 6],
}

impl FaceTally {
    fn record(&mut self, face: CellFace, handle: usize) {
        let f = face.index();
        if self.count[f] < 2 {
            self.tris[f][self.count[f] as usize] = handle;
        }
        self.count[f] += 1;
    }
}

/// One shared face shipped to the neighbouring rank, with both triangles
struct SendDatum<R: Real> {
    sender_cell: CellId,
    sender_face: CellFace,
    recv_cell: usize,
    recv_face: CellFace,
    inward_norm: bool,
    tris: [Tri<R>; 2],
}

impl<R: Real> SendDatum<R> {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(19 + 2 * 104);
        buf.extend_from_slice(&self.sender_cell.0.to_le_bytes());
        buf.push(self.sender_face.index() as u8);
        buf.extend_from_slice(&(self.recv_cell as u64).to_le_bytes());
        buf.push(self.recv_face.index() as u8);
        buf.push(self.inward_norm as u8);
        for tri in &self.tris {
            buf.extend_from_slice(&tri.label.to_le_bytes());
            buf.extend_from_slice(&tri.mask.bits().to_le_bytes());
            for v in [&tri.norm, &tri.p1, &tri.p2, &tri.p3] {
                for d in 0..3 {
                    buf.extend_from_slice(&v[d].to_f64().unwrap_or_default().to_le_bytes());
                }
            }
        }
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        let mut off = 0;
        let mut u64_at = |off: &mut usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[*off..*off + 8]);
            *off += 8;
            u64::from_le_bytes(b)
        };
        let sender_cell = CellId(u64_at(&mut off));
        let sender_face = CellFace::from_index(buf[off] as usize);
        off += 1;
        let recv_cell = u64_at(&mut off) as usize;
        let recv_face = CellFace::from_index(buf[off] as usize);
        off += 1;
        let inward_norm = buf[off] != 0;
        off += 1;

        let mut tri_at = |off: &mut usize| {
            let mut i32_b = [0u8; 4];
            i32_b.copy_from_slice(&buf[*off..*off + 4]);
            *off += 4;
            let label = i32::from_le_bytes(i32_b);
            let mut u32_b = [0u8; 4];
            u32_b.copy_from_slice(&buf[*off..*off + 4]);
            *off += 4;
            let mask = GroupMask::from_bits_retain(u32::from_le_bytes(u32_b));
            let mut vecs = [nalgebra::Vector3::zeros(); 4];
            for v in &mut vecs {
                for d in 0..3 {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(&buf[*off..*off + 8]);
                    *off += 8;
                    v[d] = R::from_f64(f64::from_le_bytes(b)).unwrap_or_else(R::zero);
                }
            }
            Tri {
                cell: sender_cell,
                label,
                mask,
                norm: vecs[0],
                p1: vecs[1],
                p2: vecs[2],
                p3: vecs[3],
            }
        };
        let tris = [tri_at(&mut off), tri_at(&mut off)];

        Self {
            sender_cell,
            sender_face,
            recv_cell,
            recv_face,
            inward_norm,
            tris,
        }
    }
}

/// Unlinks one handle from a cell's handle list (swap with last)
fn unlink<R: Real>(
    cell_surfs: &mut [Vec<usize>],
    cell: usize,
    handle: usize,
    id: CellId,
) -> Result<(), CleanupError> {
    let list = &mut cell_surfs[cell];
    let pos = list
        .iter()
        .position(|&h| h == handle)
        .ok_or(CleanupError::MissingSurfOnCell { cell: id })?;
    list.swap_remove(pos);
    Ok(())
}

/// Reconciles face-coplanar triangle pairs between neighbouring cells
///
/// Collective: every rank must call this with its own pool and exchange.
pub fn cleanup_faces<
    I: Index,
    R: Real,
    G: GridIndex<I, R>,
    C: Communicator,
    X: IrregularExchange,
>(
    grid: &G,
    comm: &C,
    exchange: &X,
    pool: &mut SurfacePool<R>,
    cell_surfs: &mut [Vec<usize>],
) -> Result<(), CleanupError> {
    let ncells = grid.num_cells();

    // tally face-coplanar triangles per cell face
    let mut tallies = vec![FaceTally::default(); ncells];
    for cell in 0..ncells {
        let bounds = grid.cell_bounds(cell);
        for &handle in &cell_surfs[cell] {
            if let Some(face) = tri_on_cell_face(&pool.tris[handle], bounds) {
                tallies[cell].record(face, handle);
            }
        }
    }

    // every face must carry zero or two triangles, globally
    let violations: u64 = tallies
        .iter()
        .flat_map(|t| t.count.iter())
        .filter(|&&n| n != 0 && n != 2)
        .count() as u64;
    let total_violations = comm.all_reduce_sum(violations);
    if total_violations != 0 {
        return Err(CleanupError::NonPairedFace {
            count: total_violations,
        });
    }

    let mut destinations = Vec::new();
    let mut records = Vec::new();
    let mut delete_list: Vec<usize> = Vec::new();

    for cell in 0..ncells {
        for &face in CellFace::all_possible() {
            if tallies[cell].count[face.index()] != 2 {
                continue;
            }
            let pair = tallies[cell].tris[face.index()];
            let id = grid.cell_id(cell);

            let inward = normal_is_inward(&pool.tris[pair[0]].norm, face);
            let other_face = face.opposite();

            match grid.face_neighbor(cell, face) {
                NeighborRef::Boundary => {
                    return Err(CleanupError::InvalidNeighbor { cell: id });
                }
                NeighborRef::Local(other) => {
                    if other == cell {
                        return Err(CleanupError::InvalidNeighbor { cell: id });
                    }
                    let other_count = tallies[other].count[other_face.index()];

                    // this cell keeps its pair
                    if other_count == 0 && inward {
                        continue;
                    }

                    if other_count == 0 {
                        // hand the pair to the neighbour the normals point into
                        let other_id = grid.cell_id(other);
                        for &handle in &pair {
                            cell_surfs[other].push(handle);
                            pool.tris[handle].cell = other_id;
                        }
                    }

                    if other_count == 2 {
                        // both sides claimed the face: drop all four triangles;
                        // clear the neighbour's tally so the pair is not
                        // reconciled again from the other side
                        tallies[other].count[other_face.index()] = 0;
                        let other_pair = tallies[other].tris[other_face.index()];
                        let other_id = grid.cell_id(other);
                        for &handle in &other_pair {
                            unlink::<R>(cell_surfs, other, handle, other_id)?;
                        }
                        delete_list.extend_from_slice(&pair);
                        delete_list.extend_from_slice(&other_pair);
                    }

                    for &handle in &pair {
                        unlink::<R>(cell_surfs, cell, handle, id)?;
                    }
                }
                NeighborRef::Remote { rank, cell: other } => {
                    destinations.push(rank);
                    records.push(
                        SendDatum {
                            sender_cell: id,
                            sender_face: face,
                            recv_cell: other,
                            recv_face: other_face,
                            inward_norm: inward,
                            tris: [pool.tris[pair[0]].clone(), pool.tris[pair[1]].clone()],
                        }
                        .encode(),
                    );

                    // if the normals point into the neighbour, it will claim
                    // the pair; drop the local copy now
                    if !inward {
                        for &handle in &pair {
                            unlink::<R>(cell_surfs, cell, handle, id)?;
                        }
                        delete_list.extend_from_slice(&pair);
                    }
                }
            }
        }
    }

    let nsend = records.len();
    let received = exchange.exchange(&destinations, records);
    trace!(
        "Face cleanup exchanged {} sent / {} received shared-face records",
        nsend,
        received.len()
    );

    for buf in received {
        let datum = SendDatum::<R>::decode(&buf);
        let cell = datum.recv_cell;
        let face = datum.recv_face;
        let id = grid.cell_id(cell);
        trace!(
            "Shared face {} of cell {} claimed from cell {} ({})",
            face,
            id,
            datum.sender_cell,
            datum.sender_face
        );

        // the sender keeps its pair, nothing to do here
        if tallies[cell].count[face.index()] == 0 && datum.inward_norm {
            continue;
        }

        if tallies[cell].count[face.index()] == 0 {
            // adopt the pair: append to the pool and bind to this cell
            for tri in datum.tris {
                let handle = pool.tris.len();
                pool.tris.push(Tri { cell: id, ..tri });
                cell_surfs[cell].push(handle);
            }
            continue;
        }

        // both sides have two triangles; the side whose normals point inward
        // deletes its pair (the other side already deleted at send time)
        let pair = tallies[cell].tris[face.index()];
        if !normal_is_inward(&pool.tris[pair[0]].norm, face) {
            continue;
        }
        for &handle in &pair {
            unlink::<R>(cell_surfs, cell, handle, id)?;
        }
        delete_list.extend_from_slice(&pair);
    }

    // compact the pool: descending order so a triangle is never moved from a
    // slot that is itself flagged for deletion
    delete_list.sort_unstable_by(|a, b| b.cmp(a));
    let ndeleted = delete_list.len();
    for handle in delete_list {
        let last = pool.tris.len() - 1;
        pool.tris.swap_remove(handle);
        if handle == last {
            continue;
        }
        // repatch the single back-pointer of the moved triangle
        let owner_id = pool.tris[handle].cell;
        let owner = grid
            .local_cell(owner_id)
            .ok_or(CleanupError::MissingSurfOnCell { cell: owner_id })?;
        let slot = cell_surfs[owner]
            .iter()
            .position(|&h| h == last)
            .ok_or(CleanupError::MissingSurfOnCell { cell: owner_id })?;
        cell_surfs[owner][slot] = handle;
    }

    debug!(
        "Face cleanup deleted {} triangles on this rank, {} remain",
        ndeleted,
        pool.tris.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::grid::{Dimension, UniformBlockIndex};
    use nalgebra::Vector3;

    fn face_pair(
        pool: &mut SurfacePool<f64>,
        cell_surfs: &mut [Vec<usize>],
        cell: usize,
        id: CellId,
        x: f64,
        nx: f64,
    ) {
        for k in 0..2 {
            let (p2, p3) = if k == 0 {
                (Vector3::new(x, 1.0, 0.0), Vector3::new(x, 1.0, 1.0))
            } else {
                (Vector3::new(x, 1.0, 1.0), Vector3::new(x, 0.0, 1.0))
            };
            let handle = pool.add_tri(1, Vector3::new(x, 0.0, 0.0), p2, p3, id);
            pool.tris[handle].norm = Vector3::new(nx, 0.0, 0.0);
            cell_surfs[cell].push(handle);
        }
    }

    fn two_cell_grid() -> UniformBlockIndex<i32, f64> {
        UniformBlockIndex::new_serial(
            Dimension::Three,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            [2, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_pair_moves_to_inward_cell() {
        // both triangles sit on the shared face x = 1, bound to cell 0, with
        // normals pointing into cell 1: cleanup hands them to cell 1
        let grid = two_cell_grid();
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 2];
        face_pair(&mut pool, &mut cell_surfs, 0, CellId(1), 1.0, 1.0);

        cleanup_faces(&grid, &SerialComm, &SerialComm, &mut pool, &mut cell_surfs).unwrap();

        assert_eq!(pool.tris.len(), 2);
        assert!(cell_surfs[0].is_empty());
        assert_eq!(cell_surfs[1].len(), 2);
        assert_eq!(pool.tris[0].cell, CellId(2));
        assert_eq!(pool.tris[1].cell, CellId(2));
    }

    #[test]
    fn test_pair_stays_on_inward_cell() {
        // normals point into cell 0 itself: the pair stays put
        let grid = two_cell_grid();
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 2];
        face_pair(&mut pool, &mut cell_surfs, 0, CellId(1), 1.0, -1.0);

        cleanup_faces(&grid, &SerialComm, &SerialComm, &mut pool, &mut cell_surfs).unwrap();

        assert_eq!(pool.tris.len(), 2);
        assert_eq!(cell_surfs[0].len(), 2);
        assert!(cell_surfs[1].is_empty());
    }

    #[test]
    fn test_both_sides_claimed_face_is_cleared() {
        // both cells put a pair on the shared face: all four triangles die
        let grid = two_cell_grid();
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 2];
        face_pair(&mut pool, &mut cell_surfs, 0, CellId(1), 1.0, 1.0);
        face_pair(&mut pool, &mut cell_surfs, 1, CellId(2), 1.0, -1.0);

        cleanup_faces(&grid, &SerialComm, &SerialComm, &mut pool, &mut cell_surfs).unwrap();

        assert!(pool.tris.is_empty());
        assert!(cell_surfs[0].is_empty());
        assert!(cell_surfs[1].is_empty());
    }

    #[test]
    fn test_non_paired_face_detected() {
        let grid = two_cell_grid();
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 2];
        // a single triangle on the shared face
        let handle = pool.add_tri(
            1,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            CellId(1),
        );
        pool.tris[handle].norm = Vector3::new(1.0, 0.0, 0.0);
        cell_surfs[0].push(handle);

        let result = cleanup_faces(&grid, &SerialComm, &SerialComm, &mut pool, &mut cell_surfs);
        assert!(matches!(
            result,
            Err(CleanupError::NonPairedFace { count: 1 })
        ));
    }

    #[test]
    fn test_compaction_repatches_moved_handles() {
        // a non-face triangle sits at the end of the pool; deleting the face
        // pair in front of it must repatch its handle
        let grid = two_cell_grid();
        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 2];
        face_pair(&mut pool, &mut cell_surfs, 0, CellId(1), 1.0, 1.0);
        face_pair(&mut pool, &mut cell_surfs, 1, CellId(2), 1.0, -1.0);
        let interior = pool.add_tri(
            1,
            Vector3::new(0.2, 0.2, 0.2),
            Vector3::new(0.8, 0.2, 0.2),
            Vector3::new(0.2, 0.8, 0.2),
            CellId(1),
        );
        cell_surfs[0].push(interior);

        cleanup_faces(&grid, &SerialComm, &SerialComm, &mut pool, &mut cell_surfs).unwrap();

        assert_eq!(pool.tris.len(), 1);
        assert_eq!(cell_surfs[0], vec![0]);
        assert_eq!(pool.tris[0].cell, CellId(1));
        assert!((pool.tris[0].p1 - Vector3::new(0.2, 0.2, 0.2)).norm() < 1e-12);
    }

    #[test]
    fn test_send_datum_roundtrip() {
        let tri = Tri {
            cell: CellId(7),
            label: 3,
            mask: GroupMask::ALL,
            norm: Vector3::new(0.0, 0.0, 1.0),
            p1: Vector3::new(0.5, 0.25, 1.0),
            p2: Vector3::new(1.0, 0.5, 1.0),
            p3: Vector3::new(0.5, 1.0, 1.0),
        };
        let datum = SendDatum::<f64> {
            sender_cell: CellId(7),
            sender_face: CellFace::from_index(5),
            recv_cell: 11,
            recv_face: CellFace::from_index(4),
            inward_norm: true,
            tris: [tri.clone(), tri],
        };
        let decoded = SendDatum::<f64>::decode(&datum.encode());
        assert_eq!(decoded.sender_cell, CellId(7));
        assert_eq!(decoded.recv_cell, 11);
        assert_eq!(decoded.recv_face, CellFace::from_index(4));
        assert!(decoded.inward_norm);
        assert_eq!(decoded.tris[0].label, 3);
        assert_eq!(decoded.tris[1].p3, Vector3::new(0.5, 1.0, 1.0));
    }
}
