//! 3D implicit surface extraction via extended marching cubes
//!
//! Each cell is processed independently: the eight corner samples form an
//! 8-bit sign pattern that selects a (case, config) pair from the static
//! [`marching_cubes_lut::CASES`] table. Unambiguous cases tile directly;
//! ambiguous cases consult bilinear face tests and trilinear interior tests
//! to pick the topologically consistent tiling. Triangles are emitted with
//! reversed point order so that their normals point into the flow region.

use arrayvec::ArrayVec;
use log::debug;
use nalgebra::Vector3;
use thiserror::Error as ThisError;

use crate::corners::CornerField;
use crate::grid::GridIndex;
use crate::interpolation::edge_crossing;
use crate::surface::SurfacePool;
use crate::{Index, Real};

pub mod marching_cubes_lut;

use marching_cubes_lut as lut;

/// Error enum for the marching cubes stage
#[derive(Debug, ThisError)]
pub enum MarchingCubesError {
    /// The dispatcher reached a branch that no corner pattern can produce
    #[error("marching cubes reached an impossible case (corner values {corners:?})")]
    InvalidCase { corners: [u8; 8] },
}

const EPSILON: f64 = 1.0e-16;

/// Corner indices of the six cube faces in Lewiner numbering, `(A, B, C, D)`
/// quads for the bilinear face tests
const FACE_QUADS: [[usize; 4]; 6] = [
    [0, 4, 5, 1],
    [1, 5, 6, 2],
    [2, 6, 7, 3],
    [3, 7, 4, 0],
    [0, 3, 2, 1],
    [4, 7, 6, 5],
];

/// Cube corner pairs spanned by the twelve cell edges (Lewiner numbering)
const EDGE_ENDPOINTS: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Per reference edge of the plain interior test: the three rails swept in
/// parallel with the edge, as (start, end) corner pairs
///
/// Rail entries here and in [`VERIFY_RAILS`] index the Lewiner-ordered `iso`
/// array: 0 is the low corner, 1 its x neighbour, 2 the xy corner, 3 the y
/// neighbour on the low face, and 4..7 the same ring on the high-z face
/// (so the `zyx` slots v000, v001, v011, v010, v100, v101, v111, v110 map to
/// 0..7 in that order).
const TEST_RAILS: [[(usize, usize); 3]; 12] = [
    [(3, 2), (7, 6), (4, 5)],
    [(0, 3), (4, 7), (5, 6)],
    [(1, 0), (5, 4), (6, 7)],
    [(2, 1), (6, 5), (7, 4)],
    [(7, 6), (3, 2), (0, 1)],
    [(4, 7), (0, 3), (1, 2)],
    [(5, 4), (1, 0), (2, 3)],
    [(6, 5), (2, 1), (3, 0)],
    [(3, 7), (2, 6), (1, 5)],
    [(0, 4), (3, 7), (2, 6)],
    [(1, 5), (0, 4), (3, 7)],
    [(2, 6), (1, 5), (0, 4)],
];

/// Rails of the quadratic section evaluated by the interior-ambiguity
/// verification, per reference edge
const VERIFY_RAILS: [[(usize, usize); 4]; 12] = [
    [(1, 0), (5, 4), (6, 7), (2, 3)],
    [(2, 3), (1, 0), (5, 4), (6, 7)],
    [(3, 2), (7, 6), (4, 5), (0, 1)],
    [(0, 1), (3, 2), (7, 6), (4, 5)],
    [(1, 2), (0, 3), (4, 7), (5, 6)],
    [(0, 3), (1, 2), (5, 6), (4, 7)],
    [(3, 0), (7, 4), (6, 5), (2, 1)],
    [(2, 1), (3, 0), (7, 4), (6, 5)],
    [(0, 4), (3, 7), (2, 6), (1, 5)],
    [(1, 5), (0, 4), (3, 7), (2, 6)],
    [(2, 6), (1, 5), (0, 4), (3, 7)],
    [(3, 7), (2, 6), (1, 5), (0, 4)],
];

/// Maps the `zyx`-indexed corner slots of a [`CornerField`] cell to the
/// Lewiner corner numbering used by the case tables
const ZYX_TO_LEWINER: [usize; 8] = [0, 1, 3, 2, 4, 5, 7, 6];

/// One grid cell prepared for triangulation
struct CubeCell<R: Real> {
    /// Corner samples in `zyx` slot order, kept for error reporting
    corners: [u8; 8],
    /// Corner samples in Lewiner order
    v: [u8; 8],
    /// Signed distances to the threshold, Lewiner order
    iso: [R; 8],
    bits: [bool; 8],
    lo: Vector3<R>,
    hi: Vector3<R>,
    threshold: R,
    config: usize,
    subconfig: usize,
}

impl<R: Real> CubeCell<R> {
    fn new(corners: &[u8], lo: Vector3<R>, hi: Vector3<R>, threshold: R) -> Self {
        let mut slots = [0u8; 8];
        slots.copy_from_slice(corners);
        let mut v = [0u8; 8];
        for (lew, &zyx) in ZYX_TO_LEWINER.iter().enumerate() {
            v[lew] = slots[zyx];
        }
        let mut iso = [R::zero(); 8];
        let mut bits = [false; 8];
        for i in 0..8 {
            iso[i] = R::from_u8_sample(v[i]) - threshold;
            bits[i] = iso[i] > R::zero();
        }
        Self {
            corners: slots,
            v,
            iso,
            bits,
            lo,
            hi,
            threshold,
            config: 0,
            subconfig: 0,
        }
    }

    fn which(&self) -> usize {
        self.bits
            .iter()
            .enumerate()
            .map(|(i, &b)| (b as usize) << i)
            .sum()
    }

    fn invalid_case(&self) -> MarchingCubesError {
        MarchingCubesError::InvalidCase {
            corners: self.corners,
        }
    }

    /// Crossing point on a cell edge; edge 12 is the mean of all crossings
    fn edge_vertex(&self, edge: i8) -> Vector3<R> {
        if edge == 12 {
            let mut sum = Vector3::zeros();
            let mut count = 0;
            for e in 0..12 {
                let (a, b) = EDGE_ENDPOINTS[e];
                if self.bits[a] != self.bits[b] {
                    sum += self.edge_vertex(e as i8);
                    count += 1;
                }
            }
            return sum / R::from_i32(count).unwrap();
        }

        let (lo, hi, t) = (&self.lo, &self.hi, self.threshold);
        let v = &self.v;
        match edge {
            0 => Vector3::new(edge_crossing(v[0], v[1], lo.x, hi.x, t), lo.y, lo.z),
            1 => Vector3::new(hi.x, edge_crossing(v[1], v[2], lo.y, hi.y, t), lo.z),
            2 => Vector3::new(edge_crossing(v[3], v[2], lo.x, hi.x, t), hi.y, lo.z),
            3 => Vector3::new(lo.x, edge_crossing(v[0], v[3], lo.y, hi.y, t), lo.z),
            4 => Vector3::new(edge_crossing(v[4], v[5], lo.x, hi.x, t), lo.y, hi.z),
            5 => Vector3::new(hi.x, edge_crossing(v[5], v[6], lo.y, hi.y, t), hi.z),
            6 => Vector3::new(edge_crossing(v[7], v[6], lo.x, hi.x, t), hi.y, hi.z),
            7 => Vector3::new(lo.x, edge_crossing(v[4], v[7], lo.y, hi.y, t), hi.z),
            8 => Vector3::new(lo.x, lo.y, edge_crossing(v[0], v[4], lo.z, hi.z, t)),
            9 => Vector3::new(hi.x, lo.y, edge_crossing(v[1], v[5], lo.z, hi.z, t)),
            10 => Vector3::new(hi.x, hi.y, edge_crossing(v[2], v[6], lo.z, hi.z, t)),
            _ => Vector3::new(lo.x, hi.y, edge_crossing(v[3], v[7], lo.z, hi.z, t)),
        }
    }

    /// Appends the crossing points of one tiling row to the output buffer
    fn add_triangles(
        &self,
        tiling: &[i8],
        n: usize,
        points: &mut ArrayVec<Vector3<R>, 36>,
    ) -> usize {
        for &edge in &tiling[..3 * n] {
            points.push(self.edge_vertex(edge));
        }
        n
    }

    /// Bilinear saddle test on one of the six cube faces
    ///
    /// With a positive face entry the test returns whether the above-threshold
    /// corners connect across the face; a negative entry inverts the answer.
    fn test_face(&self, face: i8) -> Result<bool, MarchingCubesError> {
        let index = face.unsigned_abs() as usize;
        if index == 0 || index > 6 {
            return Err(self.invalid_case());
        }
        let [qa, qb, qc, qd] = FACE_QUADS[index - 1];
        let (a, b, c, d) = (self.iso[qa], self.iso[qb], self.iso[qc], self.iso[qd]);

        let saddle = a * c - b * d;
        if saddle.abs() < R::from_float(EPSILON) {
            return Ok(face >= 0);
        }
        Ok(R::from_i32(face as i32).unwrap() * a * saddle >= R::zero())
    }

    /// Trilinear interior critical-point test resolving tunnel topology
    fn test_interior(&self, s: i8, icase: usize) -> Result<bool, MarchingCubesError> {
        let iso = &self.iso;
        let two = R::from_float(2.0);

        let (at, bt, ct, dt) = match icase {
            4 | 10 => {
                let a = (iso[4] - iso[0]) * (iso[6] - iso[2])
                    - (iso[7] - iso[3]) * (iso[5] - iso[1]);
                let b = iso[2] * (iso[4] - iso[0]) + iso[0] * (iso[6] - iso[2])
                    - iso[1] * (iso[7] - iso[3])
                    - iso[3] * (iso[5] - iso[1]);
                let t = -b / (two * a);
                if t < R::zero() || t > R::one() {
                    return Ok(s > 0);
                }
                (
                    iso[0] + (iso[4] - iso[0]) * t,
                    iso[3] + (iso[7] - iso[3]) * t,
                    iso[2] + (iso[6] - iso[2]) * t,
                    iso[1] + (iso[5] - iso[1]) * t,
                )
            }
            6 | 7 | 12 | 13 => {
                let edge = match icase {
                    6 => lut::TEST6[self.config][2],
                    7 => lut::TEST7[self.config][4],
                    12 => lut::TEST12[self.config][3],
                    _ => lut::TILING13_5_1[self.config][self.subconfig][0],
                };
                if !(0..12).contains(&(edge as i32)) {
                    return Err(self.invalid_case());
                }
                let (a0, a1) = EDGE_ENDPOINTS[edge as usize];
                let t = iso[a0] / (iso[a0] - iso[a1]);
                let [(b0, b1), (c0, c1), (d0, d1)] = TEST_RAILS[edge as usize];
                (
                    R::zero(),
                    iso[b0] + (iso[b1] - iso[b0]) * t,
                    iso[c0] + (iso[c1] - iso[c0]) * t,
                    iso[d0] + (iso[d1] - iso[d0]) * t,
                )
            }
            _ => return Err(self.invalid_case()),
        };

        let mut test = 0;
        if at >= R::zero() {
            test += 1;
        }
        if bt >= R::zero() {
            test += 2;
        }
        if ct >= R::zero() {
            test += 4;
        }
        if dt >= R::zero() {
            test += 8;
        }
        Ok(match test {
            0 | 1 | 2 | 3 | 4 | 6 | 8 | 9 | 12 => s > 0,
            7 | 11 | 13 | 14 | 15 => s < 0,
            5 => {
                if at * ct - bt * dt < R::from_float(EPSILON) {
                    s > 0
                } else {
                    s < 0
                }
            }
            _ => {
                // test == 10
                if at * ct - bt * dt >= R::from_float(EPSILON) {
                    s > 0
                } else {
                    s < 0
                }
            }
        })
    }

    /// Picks the reference edge whose swept section contains the two corners
    /// of interest on the given ambiguous face
    fn interior_ambiguity(&self, amb_face: usize, s: i8) -> i32 {
        let (pairs, edges): ([(usize, usize); 4], [i32; 4]) = match amb_face {
            1 | 3 => ([(1, 7), (0, 6), (3, 5), (2, 4)], [4, 5, 6, 7]),
            2 | 4 => ([(1, 7), (2, 4), (3, 5), (0, 6)], [0, 1, 2, 3]),
            _ => ([(0, 6), (1, 7), (2, 4), (3, 5)], [8, 9, 10, 11]),
        };
        let s = R::from_i32(s as i32).unwrap();
        let mut edge = -1;
        for (&(p, q), &e) in pairs.iter().zip(edges.iter()) {
            if self.iso[p] * s > R::zero() && self.iso[q] * s > R::zero() {
                edge = e;
            }
        }
        edge
    }

    /// Verifies along one reference edge whether the swept quadratic section
    /// opens a connection; returns 1 when the section stays empty
    fn interior_ambiguity_verification(&self, edge: i32) -> i32 {
        if !(0..12).contains(&edge) {
            return 1;
        }
        let iso = &self.iso;
        let [(a0, a1), (b0, b1), (c0, c1), (d0, d1)] = VERIFY_RAILS[edge as usize];
        let da = iso[a1] - iso[a0];
        let db = iso[b1] - iso[b0];
        let dc = iso[c1] - iso[c0];
        let dd = iso[d1] - iso[d0];
        let a = da * dc - db * dd;
        let b = iso[c0] * da + iso[a0] * dc - iso[d0] * db - iso[b0] * dd;

        if a > R::zero() {
            return 1;
        }
        let t = -b / (R::from_float(2.0) * a);
        if t < R::zero() || t > R::one() {
            return 1;
        }

        let at = iso[a0] + da * t;
        let bt = iso[b0] + db * t;
        let ct = iso[c0] + dc * t;
        let dt = iso[d0] + dd * t;
        let verify = at * ct - bt * dt;
        if verify > R::zero() {
            return 0;
        }
        1
    }

    /// Per-ambiguous-face vote on the interior topology of cases 4, 6, 7, 10
    /// and 12; any non-zero vote sum selects the first tiling of the pair
    fn modified_test_interior(&self, s: i8, icase: usize) -> Result<bool, MarchingCubesError> {
        let mut inter_amb = 0;
        match icase {
            4 => {
                for amb_face in [1, 2, 5] {
                    let edge = self.interior_ambiguity(amb_face, s);
                    inter_amb += self.interior_ambiguity_verification(edge);
                }
            }
            6 => {
                let amb_face = lut::TEST6[self.config][0].unsigned_abs() as usize;
                let edge = self.interior_ambiguity(amb_face, s);
                inter_amb += self.interior_ambiguity_verification(edge);
            }
            7 => {
                for amb_face in [1, 2, 5] {
                    let edge = self.interior_ambiguity(amb_face, -s);
                    inter_amb += self.interior_ambiguity_verification(edge);
                }
            }
            10 => {
                let amb_face = lut::TEST10[self.config][0].unsigned_abs() as usize;
                let edge = self.interior_ambiguity(amb_face, s);
                inter_amb += self.interior_ambiguity_verification(edge);
            }
            12 => {
                for k in 0..2 {
                    let amb_face = lut::TEST12[self.config][k].unsigned_abs() as usize;
                    let edge = self.interior_ambiguity(amb_face, s);
                    inter_amb += self.interior_ambiguity_verification(edge);
                }
            }
            _ => return Err(self.invalid_case()),
        }
        Ok(inter_amb != 0)
    }

    /// Two-root interior test of case 13; returns whether the interior is empty
    fn interior_test_case13(&self) -> bool {
        let iso = &self.iso;
        let a = (iso[0] - iso[1]) * (iso[7] - iso[6]) - (iso[4] - iso[5]) * (iso[3] - iso[2]);
        let b = iso[6] * (iso[0] - iso[1]) + iso[1] * (iso[7] - iso[6])
            - iso[2] * (iso[4] - iso[5])
            - iso[5] * (iso[3] - iso[2]);
        let c = iso[1] * iso[6] - iso[5] * iso[2];

        let delta = b * b - R::from_float(4.0) * a * c;
        if delta < R::zero() || a == R::zero() {
            return true;
        }
        let sqrt_delta = delta.sqrt();
        let two_a = R::from_float(2.0) * a;
        let t1 = (-b + sqrt_delta) / two_a;
        let t2 = (-b - sqrt_delta) / two_a;

        if t1 <= R::zero() || t1 >= R::one() || t2 <= R::zero() || t2 >= R::one() {
            return true;
        }

        let section = |t: R| {
            let at = iso[1] + (iso[0] - iso[1]) * t;
            let bt = iso[5] + (iso[4] - iso[5]) * t;
            let ct = iso[6] + (iso[7] - iso[6]) * t;
            let dt = iso[2] + (iso[3] - iso[2]) * t;
            let denom = at + ct - bt - dt;
            if denom == R::zero() {
                return None;
            }
            Some(((at - dt) / denom, (at - bt) / denom))
        };

        match (section(t1), section(t2)) {
            (Some((x1, y1)), Some((x2, y2))) => {
                let inside = |v: R| v > R::zero() && v < R::one();
                !(inside(x1) && inside(x2) && inside(y1) && inside(y2))
            }
            _ => true,
        }
    }

    /// Emits the crossing points of the resolved tiling, three per triangle
    fn triangulate(
        &mut self,
        points: &mut ArrayVec<Vector3<R>, 36>,
    ) -> Result<usize, MarchingCubesError> {
        let which = self.which();
        let icase = lut::CASES[which][0];
        self.config = lut::CASES[which][1] as usize;
        self.subconfig = 0;
        let q = self.config;

        let nsurf = match icase {
            0 => 0,
            1 => self.add_triangles(&lut::TILING1[q], 1, points),
            2 => self.add_triangles(&lut::TILING2[q], 2, points),
            3 => {
                if self.test_face(lut::TEST3[q])? {
                    self.add_triangles(&lut::TILING3_2[q], 4, points)
                } else {
                    self.add_triangles(&lut::TILING3_1[q], 2, points)
                }
            }
            4 => {
                if self.modified_test_interior(lut::TEST4[q], 4)? {
                    self.add_triangles(&lut::TILING4_1[q], 2, points)
                } else {
                    self.add_triangles(&lut::TILING4_2[q], 6, points)
                }
            }
            5 => self.add_triangles(&lut::TILING5[q], 3, points),
            6 => {
                if self.test_face(lut::TEST6[q][0])? {
                    self.add_triangles(&lut::TILING6_2[q], 5, points)
                } else if self.modified_test_interior(lut::TEST6[q][1], 6)? {
                    self.add_triangles(&lut::TILING6_1_1[q], 3, points)
                } else {
                    self.add_triangles(&lut::TILING6_1_2[q], 9, points)
                }
            }
            7 => {
                let mut subconfig = 0;
                if self.test_face(lut::TEST7[q][0])? {
                    subconfig += 1;
                }
                if self.test_face(lut::TEST7[q][1])? {
                    subconfig += 2;
                }
                if self.test_face(lut::TEST7[q][2])? {
                    subconfig += 4;
                }
                match subconfig {
                    0 => self.add_triangles(&lut::TILING7_1[q], 3, points),
                    1 => self.add_triangles(&lut::TILING7_2[q][0], 5, points),
                    2 => self.add_triangles(&lut::TILING7_2[q][1], 5, points),
                    3 => self.add_triangles(&lut::TILING7_3[q][0], 9, points),
                    4 => self.add_triangles(&lut::TILING7_2[q][2], 5, points),
                    5 => self.add_triangles(&lut::TILING7_3[q][1], 9, points),
                    6 => self.add_triangles(&lut::TILING7_3[q][2], 9, points),
                    _ => {
                        if self.test_interior(lut::TEST7[q][3], 7)? {
                            self.add_triangles(&lut::TILING7_4_2[q], 9, points)
                        } else {
                            self.add_triangles(&lut::TILING7_4_1[q], 5, points)
                        }
                    }
                }
            }
            8 => self.add_triangles(&lut::TILING8[q], 2, points),
            9 => self.add_triangles(&lut::TILING9[q], 4, points),
            10 => {
                if self.test_face(lut::TEST10[q][0])? {
                    if self.test_face(lut::TEST10[q][1])? {
                        self.add_triangles(&lut::TILING10_1_1_INV[q], 4, points)
                    } else {
                        self.add_triangles(&lut::TILING10_2[q], 8, points)
                    }
                } else if self.test_face(lut::TEST10[q][1])? {
                    self.add_triangles(&lut::TILING10_2_INV[q], 8, points)
                } else if self.test_interior(lut::TEST10[q][2], 10)? {
                    self.add_triangles(&lut::TILING10_1_1[q], 4, points)
                } else {
                    self.add_triangles(&lut::TILING10_1_2[q], 8, points)
                }
            }
            11 => self.add_triangles(&lut::TILING11[q], 4, points),
            12 => {
                if self.test_face(lut::TEST12[q][0])? {
                    if self.test_face(lut::TEST12[q][1])? {
                        self.add_triangles(&lut::TILING12_1_1_INV[q], 4, points)
                    } else {
                        self.add_triangles(&lut::TILING12_2[q], 8, points)
                    }
                } else if self.test_face(lut::TEST12[q][1])? {
                    self.add_triangles(&lut::TILING12_2_INV[q], 8, points)
                } else if self.test_interior(lut::TEST12[q][2], 12)? {
                    self.add_triangles(&lut::TILING12_1_1[q], 4, points)
                } else {
                    self.add_triangles(&lut::TILING12_1_2[q], 8, points)
                }
            }
            13 => {
                let mut combo = 0usize;
                for i in 0..6 {
                    if self.test_face(lut::TEST13[q][i])? {
                        combo += 1 << i;
                    }
                }
                match lut::SUBCONFIG13[combo] {
                    0 => self.add_triangles(&lut::TILING13_1[q], 4, points),
                    v @ 1..=6 => {
                        self.add_triangles(&lut::TILING13_2[q][v as usize - 1], 6, points)
                    }
                    v @ 7..=18 => {
                        self.add_triangles(&lut::TILING13_3[q][v as usize - 7], 10, points)
                    }
                    v @ 19..=22 => {
                        self.add_triangles(&lut::TILING13_4[q][v as usize - 19], 12, points)
                    }
                    v @ 23..=26 => {
                        self.subconfig = v as usize - 23;
                        if self.interior_test_case13() {
                            self.add_triangles(&lut::TILING13_5_1[q][self.subconfig], 6, points)
                        } else {
                            self.add_triangles(&lut::TILING13_5_2[q][self.subconfig], 10, points)
                        }
                    }
                    v @ 27..=38 => {
                        self.add_triangles(&lut::TILING13_3_INV[q][v as usize - 27], 10, points)
                    }
                    v @ 39..=44 => {
                        self.add_triangles(&lut::TILING13_2_INV[q][v as usize - 39], 6, points)
                    }
                    45 => self.add_triangles(&lut::TILING13_1_INV[q], 4, points),
                    _ => return Err(self.invalid_case()),
                }
            }
            14 => self.add_triangles(&lut::TILING14[q], 4, points),
            _ => return Err(self.invalid_case()),
        };

        Ok(nsurf)
    }
}

/// Extracts triangles for all owned cells and binds them to their cells
///
/// Triangles are stored with reversed point order (`p2, p1, p0` of the table
/// sequence) so their normals point into the flow region.
pub fn marching_cubes<I: Index, R: Real, G: GridIndex<I, R>>(
    grid: &G,
    field: &CornerField,
    threshold: R,
    pool: &mut SurfacePool<R>,
    cell_surfs: &mut [Vec<usize>],
) -> Result<(), MarchingCubesError> {
    let mut points = ArrayVec::new();

    for cell in 0..grid.num_cells() {
        let bounds = grid.cell_bounds(cell);
        let mut cube = CubeCell::new(
            field.corners(cell),
            *bounds.min(),
            *bounds.max(),
            threshold,
        );

        points.clear();
        let nsurf = cube.triangulate(&mut points)?;

        let label = field.label(cell);
        let id = grid.cell_id(cell);
        for i in 0..nsurf {
            let handle = pool.add_tri(
                label,
                points[3 * i + 2],
                points[3 * i + 1],
                points[3 * i],
                id,
            );
            cell_surfs[cell].push(handle);
        }
    }

    debug!(
        "Marching cubes produced {} triangles on this rank",
        pool.tris.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aabb::Aabb3d;
    use crate::grid::{Dimension, UniformBlockIndex};
    use crate::surface::tri_on_cell_face;
    use crate::topology::{Axis, Direction};

    /// Runs one cell and returns the triangles in emitted (reversed) order
    fn triangulate_cell(corners: [u8; 8], threshold: f64) -> Vec<[Vector3<f64>; 3]> {
        let mut cube = CubeCell::new(
            &corners,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            threshold,
        );
        let mut points = ArrayVec::new();
        let n = cube.triangulate(&mut points).unwrap();
        (0..n)
            .map(|i| [points[3 * i + 2], points[3 * i + 1], points[3 * i]])
            .collect()
    }

    #[test]
    fn test_uniform_cell_produces_nothing() {
        assert!(triangulate_cell([0; 8], 127.5).is_empty());
        assert!(triangulate_cell([255; 8], 127.5).is_empty());
    }

    #[test]
    fn test_single_corner_above() {
        // One corner above threshold yields a single triangle cutting that
        // corner at the interpolated parameter
        let tris = triangulate_cell([200, 0, 0, 0, 0, 0, 0, 0], 127.5);
        assert_eq!(tris.len(), 1);

        let t = 127.5 / 200.0;
        let mut expected = vec![
            Vector3::new(t, 0.0, 0.0),
            Vector3::new(0.0, t, 0.0),
            Vector3::new(0.0, 0.0, t),
        ];
        for p in &tris[0] {
            let idx = expected
                .iter()
                .position(|e| (e - p).norm() < 1e-12)
                .expect("vertex on a corner edge");
            expected.remove(idx);
        }

        // emitted winding points the normal away from the hot corner
        let [p1, p2, p3] = tris[0];
        let norm = (p2 - p1).cross(&(p3 - p1));
        assert!(norm.x > 0.0 && norm.y > 0.0 && norm.z > 0.0);
    }

    #[test]
    fn test_single_corner_per_position() {
        // every corner pattern with one sample above threshold gives one
        // triangle with vertices on the three incident edges
        for slot in 0..8 {
            let mut corners = [0u8; 8];
            corners[slot] = 255;
            let tris = triangulate_cell(corners, 127.5);
            assert_eq!(tris.len(), 1, "corner slot {}", slot);
        }
    }

    #[test]
    fn test_opposite_corners_separate() {
        // two corners on a body diagonal produce two separate triangles for
        // weak values (no tunnel)
        let tris = triangulate_cell([130, 0, 0, 0, 0, 0, 0, 130], 127.5);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_body_diagonal_interior_resolution() {
        // asymmetric samples on the body-diagonal pair drive the per-face
        // interior votes both ways: weak opposite corners stay separate,
        // strong ones open a tunnel
        let tris = triangulate_cell([169, 57, 47, 57, 73, 34, 43, 246], 127.5);
        assert_eq!(tris.len(), 2);
        let tris = triangulate_cell([237, 112, 87, 96, 114, 91, 104, 211], 127.5);
        assert_eq!(tris.len(), 6);
    }

    #[test]
    fn test_edge_with_corner_interior_resolution() {
        // edge pair plus isolated corner, ambiguous face disconnected: the
        // single-face interior vote separates or tunnels the two components
        let tris = triangulate_cell([166, 170, 38, 44, 105, 90, 83, 184], 127.5);
        assert_eq!(tris.len(), 3);
        let tris = triangulate_cell([238, 147, 58, 92, 90, 66, 97, 235], 127.5);
        assert_eq!(tris.len(), 9);
    }

    #[test]
    fn test_opposite_edges_interior_resolution() {
        // two opposite parallel edges with both face tests negative: the
        // interior test picks two sleeves or one tunnel
        let tris = triangulate_cell([37, 83, 176, 172, 165, 191, 106, 18], 127.5);
        assert_eq!(tris.len(), 4);
        let tris = triangulate_cell([97, 57, 254, 241, 144, 194, 43, 19], 127.5);
        assert_eq!(tris.len(), 8);
    }

    #[test]
    fn test_corner_l_interior_resolution() {
        // an L of three corners plus an isolated one, both face tests
        // negative and an empty interior: cap and strip stay separate
        let tris = triangulate_cell([73, 228, 243, 246, 143, 34, 91, 79], 127.5);
        assert_eq!(tris.len(), 4);
    }

    #[test]
    fn test_alternating_saddle_degenerate() {
        // the fully alternating pattern with exactly saturated samples ties
        // every bilinear face test; the resolution caps the four
        // below-threshold corners
        let tris = triangulate_cell([255, 0, 0, 255, 0, 255, 255, 0], 127.5);
        assert_eq!(tris.len(), 4);
    }

    #[test]
    fn test_alternating_saddle_resolved() {
        // perturbing the same pattern away from the tie yields one of the
        // richer sub-resolutions
        let tris = triangulate_cell([255, 10, 10, 230, 10, 230, 240, 10], 127.5);
        assert!(matches!(tris.len(), 4 | 6 | 10 | 12));
    }

    #[test]
    fn test_connected_saddle_emits_face_pair() {
        // a hot diagonal on the high-x face with warm opposite corners: the
        // bilinear saddle connects, so the resolution places two triangles in
        // the face plane plus the two corner caps
        let tris = triangulate_cell([0, 255, 0, 100, 0, 100, 0, 255], 127.5);
        assert_eq!(tris.len(), 4);

        let bounds = Aabb3d::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0));
        let mut on_face = 0;
        for [p1, p2, p3] in &tris {
            let tri = crate::surface::Tri {
                cell: crate::grid::CellId(1),
                label: 1,
                mask: Default::default(),
                norm: Vector3::zeros(),
                p1: *p1,
                p2: *p2,
                p3: *p3,
            };
            if let Some(face) = tri_on_cell_face(&tri, &bounds) {
                assert_eq!(face, Axis::X.with_direction(Direction::Positive));
                on_face += 1;
            }
        }
        assert_eq!(on_face, 2);
    }

    #[test]
    fn test_extraction_binds_cells() {
        let grid = UniformBlockIndex::<i32, f64>::new_serial(
            Dimension::Three,
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
            [2, 1, 1],
        )
        .unwrap();
        let mut field = CornerField::new(Dimension::Three, 2);
        // hot sample on the shared face corner (slot 1 of cell 0, slot 0 of cell 1)
        field.set_corner(0, 1, 200);
        field.set_corner(1, 0, 200);

        let mut pool = SurfacePool::new_implicit();
        let mut cell_surfs = vec![Vec::new(); 2];
        marching_cubes(&grid, &field, 127.5, &mut pool, &mut cell_surfs).unwrap();

        assert_eq!(pool.tris.len(), 2);
        assert_eq!(cell_surfs[0], vec![0]);
        assert_eq!(cell_surfs[1], vec![1]);
        assert_eq!(pool.tris[0].cell, grid.cell_id(0));
        assert_eq!(pool.tris[1].cell, grid.cell_id(1));
    }
}
