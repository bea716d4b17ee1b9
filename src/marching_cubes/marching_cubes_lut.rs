//! Static case tables for the extended marching cubes triangulation
//!
//! The tables follow the classification of Lewiner et al., "Efficient
//! implementation of Marching Cubes' cases with topological guarantees":
//! `CASES` maps the 8-bit corner sign pattern to a (case, config) pair, the
//! `TILING*` tables hold the triangle fans for every configuration as cell
//! edge indices (12 denotes the cell-centre vertex), and the `TEST*` /
//! `SUBCONFIG13` tables drive the face and interior disambiguation. The data
//! is opaque; the dispatch logic lives in the parent module.

#[rustfmt::skip]
pub static CASES: [[i8; 2]; 256] = [
    [0, 0],
    [1, 0],
    [1, 1],
    [2, 0],
    [1, 2],
    [3, 0],
    [2, 1],
    [5, 0],
    [1, 3],
    [2, 2],
    [3, 1],
    [5, 1],
    [2, 3],
    [5, 2],
    [5, 3],
    [8, 0],
    [1, 4],
    [2, 4],
    [3, 2],
    [5, 4],
    [4, 0],
    [6, 0],
    [6, 1],
    [11, 0],
    [3, 3],
    [5, 5],
    [7, 0],
    [9, 0],
    [6, 2],
    [14, 0],
    [12, 0],
    [5, 6],
    [1, 5],
    [3, 4],
    [2, 5],
    [5, 7],
    [3, 5],
    [7, 1],
    [5, 8],
    [9, 1],
    [4, 1],
    [6, 3],
    [6, 4],
    [14, 1],
    [6, 5],
    [12, 1],
    [11, 1],
    [5, 9],
    [2, 6],
    [5, 10],
    [5, 11],
    [8, 1],
    [6, 6],
    [12, 2],
    [14, 2],
    [5, 12],
    [6, 7],
    [11, 2],
    [12, 3],
    [5, 13],
    [10, 0],
    [6, 8],
    [6, 9],
    [2, 7],
    [1, 6],
    [4, 2],
    [3, 6],
    [6, 10],
    [2, 8],
    [6, 11],
    [5, 14],
    [14, 3],
    [3, 7],
    [6, 12],
    [7, 2],
    [12, 4],
    [5, 15],
    [11, 3],
    [9, 2],
    [5, 16],
    [3, 8],
    [6, 13],
    [7, 3],
    [12, 5],
    [6, 14],
    [10, 1],
    [12, 6],
    [6, 15],
    [7, 4],
    [12, 7],
    [13, 0],
    [7, 5],
    [12, 8],
    [6, 16],
    [7, 6],
    [3, 9],
    [2, 9],
    [6, 17],
    [5, 17],
    [11, 4],
    [5, 18],
    [12, 9],
    [8, 2],
    [5, 19],
    [6, 18],
    [10, 2],
    [12, 10],
    [6, 19],
    [14, 4],
    [6, 20],
    [5, 20],
    [2, 10],
    [5, 21],
    [14, 5],
    [9, 3],
    [5, 22],
    [11, 5],
    [6, 21],
    [5, 23],
    [2, 11],
    [12, 11],
    [6, 22],
    [7, 7],
    [3, 10],
    [6, 23],
    [4, 3],
    [3, 11],
    [1, 7],
    [1, 8],
    [3, 12],
    [4, 4],
    [6, 24],
    [3, 13],
    [7, 8],
    [6, 25],
    [12, 12],
    [2, 12],
    [5, 24],
    [6, 26],
    [11, 6],
    [5, 25],
    [9, 4],
    [14, 6],
    [5, 26],
    [2, 13],
    [5, 27],
    [6, 27],
    [14, 7],
    [6, 28],
    [12, 13],
    [10, 3],
    [6, 29],
    [5, 28],
    [8, 3],
    [12, 14],
    [5, 29],
    [11, 7],
    [5, 30],
    [6, 30],
    [2, 14],
    [3, 14],
    [7, 9],
    [6, 31],
    [12, 15],
    [7, 10],
    [13, 1],
    [12, 16],
    [7, 11],
    [6, 32],
    [12, 17],
    [10, 4],
    [6, 33],
    [12, 18],
    [7, 12],
    [6, 34],
    [3, 15],
    [5, 31],
    [9, 5],
    [11, 8],
    [5, 32],
    [12, 19],
    [7, 13],
    [6, 35],
    [3, 16],
    [14, 8],
    [5, 33],
    [6, 36],
    [2, 15],
    [6, 37],
    [3, 17],
    [4, 5],
    [1, 9],
    [2, 16],
    [6, 38],
    [6, 39],
    [10, 5],
    [5, 34],
    [12, 20],
    [11, 9],
    [6, 40],
    [5, 35],
    [14, 9],
    [12, 21],
    [6, 41],
    [8, 4],
    [5, 36],
    [5, 37],
    [2, 17],
    [5, 38],
    [11, 10],
    [12, 22],
    [6, 42],
    [14, 10],
    [6, 43],
    [6, 44],
    [4, 6],
    [9, 6],
    [5, 39],
    [7, 14],
    [3, 18],
    [5, 40],
    [2, 18],
    [3, 19],
    [1, 10],
    [5, 41],
    [12, 23],
    [14, 11],
    [6, 45],
    [9, 7],
    [7, 15],
    [5, 42],
    [3, 20],
    [11, 11],
    [6, 46],
    [6, 47],
    [4, 7],
    [5, 43],
    [3, 21],
    [2, 19],
    [1, 11],
    [8, 5],
    [5, 44],
    [5, 45],
    [2, 20],
    [5, 46],
    [3, 22],
    [2, 21],
    [1, 12],
    [5, 47],
    [2, 22],
    [3, 23],
    [1, 13],
    [2, 23],
    [1, 14],
    [1, 15],
    [0, 1],
];

#[rustfmt::skip]
pub static TILING1: [[i8; 3]; 16] = [
    [0, 8, 3],
    [1, 9, 0],
    [2, 10, 1],
    [3, 11, 2],
    [7, 8, 4],
    [4, 9, 5],
    [5, 10, 6],
    [7, 11, 6],
    [6, 11, 7],
    [6, 10, 5],
    [5, 9, 4],
    [4, 8, 7],
    [2, 11, 3],
    [1, 10, 2],
    [0, 9, 1],
    [3, 8, 0],
];

#[rustfmt::skip]
pub static TILING2: [[i8; 6]; 24] = [
    [1, 9, 8, 1, 8, 3],
    [2, 10, 9, 2, 9, 0],
    [0, 8, 11, 0, 11, 2],
    [3, 11, 10, 3, 10, 1],
    [0, 4, 7, 0, 7, 3],
    [1, 5, 4, 1, 4, 0],
    [7, 8, 9, 7, 9, 5],
    [7, 11, 10, 7, 10, 5],
    [2, 6, 5, 2, 5, 1],
    [4, 9, 10, 4, 10, 6],
    [4, 8, 11, 4, 11, 6],
    [2, 6, 7, 2, 7, 3],
    [3, 7, 6, 3, 6, 2],
    [6, 11, 8, 6, 8, 4],
    [6, 10, 9, 6, 9, 4],
    [1, 5, 6, 1, 6, 2],
    [5, 10, 11, 5, 11, 7],
    [5, 9, 8, 5, 8, 7],
    [0, 4, 5, 0, 5, 1],
    [3, 7, 4, 3, 4, 0],
    [1, 10, 11, 1, 11, 3],
    [2, 11, 8, 2, 8, 0],
    [0, 9, 10, 0, 10, 2],
    [3, 8, 9, 3, 9, 1],
];

pub static TEST3: [i8; 24] = [5, 5, 1, 4, 1, 2, 2, 3, 6, -6, -3, -4, 4, 3, 6, -6, -3, -2, -2, -1, -4, -1, -5, -5];

#[rustfmt::skip]
pub static TILING3_1: [[i8; 6]; 24] = [
    [0, 8, 3, 2, 10, 1],
    [1, 9, 0, 3, 11, 2],
    [1, 9, 0, 7, 8, 4],
    [3, 11, 2, 7, 8, 4],
    [0, 8, 3, 4, 9, 5],
    [2, 10, 1, 4, 9, 5],
    [1, 9, 0, 5, 10, 6],
    [3, 11, 2, 5, 10, 6],
    [7, 8, 4, 5, 10, 6],
    [5, 9, 4, 7, 11, 6],
    [1, 10, 2, 7, 11, 6],
    [3, 8, 0, 7, 11, 6],
    [0, 8, 3, 6, 11, 7],
    [2, 10, 1, 6, 11, 7],
    [4, 9, 5, 6, 11, 7],
    [4, 8, 7, 6, 10, 5],
    [2, 11, 3, 6, 10, 5],
    [0, 9, 1, 6, 10, 5],
    [1, 10, 2, 5, 9, 4],
    [3, 8, 0, 5, 9, 4],
    [2, 11, 3, 4, 8, 7],
    [0, 9, 1, 4, 8, 7],
    [0, 9, 1, 2, 11, 3],
    [3, 8, 0, 1, 10, 2],
];

#[rustfmt::skip]
pub static TILING3_2: [[i8; 12]; 24] = [
    [0, 8, 3, 2, 10, 1, 3, 2, 1, 3, 1, 0],
    [1, 9, 0, 3, 11, 2, 3, 2, 1, 3, 1, 0],
    [1, 9, 0, 7, 8, 4, 9, 4, 8, 0, 9, 8],
    [3, 11, 2, 7, 8, 4, 8, 7, 11, 3, 8, 11],
    [0, 8, 3, 4, 9, 5, 9, 4, 8, 0, 9, 8],
    [2, 10, 1, 4, 9, 5, 10, 5, 9, 1, 10, 9],
    [1, 9, 0, 5, 10, 6, 10, 5, 9, 1, 10, 9],
    [3, 11, 2, 5, 10, 6, 11, 6, 10, 2, 11, 10],
    [7, 8, 4, 5, 10, 6, 5, 6, 7, 4, 5, 7],
    [7, 11, 6, 7, 6, 5, 7, 5, 9, 7, 9, 4],
    [1, 10, 6, 1, 6, 7, 1, 7, 11, 1, 11, 2],
    [3, 11, 6, 3, 6, 7, 3, 7, 8, 3, 8, 0],
    [0, 8, 3, 6, 11, 7, 8, 7, 11, 3, 8, 11],
    [2, 10, 1, 6, 11, 7, 11, 6, 10, 2, 11, 10],
    [4, 9, 5, 6, 11, 7, 5, 6, 7, 4, 5, 7],
    [4, 8, 7, 4, 7, 6, 4, 6, 10, 4, 10, 5],
    [2, 10, 5, 2, 5, 6, 2, 6, 11, 2, 11, 3],
    [0, 9, 5, 0, 5, 6, 0, 6, 10, 0, 10, 1],
    [1, 9, 4, 1, 4, 5, 1, 5, 10, 1, 10, 2],
    [3, 8, 4, 3, 4, 5, 3, 5, 9, 3, 9, 0],
    [2, 11, 7, 2, 7, 4, 2, 4, 8, 2, 8, 3],
    [0, 8, 7, 0, 7, 4, 0, 4, 9, 0, 9, 1],
    [0, 9, 1, 0, 1, 2, 0, 2, 11, 0, 11, 3],
    [1, 10, 2, 1, 2, 3, 1, 3, 8, 1, 8, 0],
];

pub static TEST4: [i8; 8] = [7, 7, 7, 7, 7, 7, 7, 7];

#[rustfmt::skip]
pub static TILING4_1: [[i8; 6]; 8] = [
    [2, 10, 1, 7, 8, 4],
    [3, 11, 2, 4, 9, 5],
    [0, 8, 3, 5, 10, 6],
    [0, 9, 1, 7, 11, 6],
    [1, 9, 0, 6, 11, 7],
    [3, 8, 0, 6, 10, 5],
    [2, 11, 3, 5, 9, 4],
    [1, 10, 2, 4, 8, 7],
];

#[rustfmt::skip]
pub static TILING4_2: [[i8; 18]; 8] = [
    [2, 7, 8, 2, 10, 7, 10, 4, 7, 10, 1, 4, 1, 8, 4, 1, 2, 8],
    [3, 4, 9, 3, 11, 4, 11, 5, 4, 11, 2, 5, 2, 9, 5, 2, 3, 9],
    [0, 5, 10, 0, 8, 5, 8, 6, 5, 8, 3, 6, 3, 10, 6, 3, 0, 10],
    [0, 7, 11, 0, 9, 7, 9, 6, 7, 9, 1, 6, 1, 11, 6, 1, 0, 11],
    [1, 6, 11, 1, 9, 6, 9, 7, 6, 9, 0, 7, 0, 11, 7, 0, 1, 11],
    [3, 6, 10, 3, 8, 6, 8, 5, 6, 8, 0, 5, 0, 10, 5, 0, 3, 10],
    [2, 5, 9, 2, 11, 5, 11, 4, 5, 11, 3, 4, 3, 9, 4, 3, 2, 9],
    [1, 4, 8, 1, 10, 4, 10, 7, 4, 10, 2, 7, 2, 8, 7, 2, 1, 8],
];

#[rustfmt::skip]
pub static TILING5: [[i8; 9]; 48] = [
    [2, 10, 9, 2, 9, 8, 2, 8, 3],
    [1, 9, 8, 1, 8, 11, 1, 11, 2],
    [0, 8, 11, 0, 11, 10, 0, 10, 1],
    [3, 11, 10, 3, 10, 9, 3, 9, 0],
    [1, 9, 4, 1, 4, 7, 1, 7, 3],
    [0, 4, 7, 0, 7, 11, 0, 11, 2],
    [7, 11, 10, 7, 10, 9, 7, 9, 4],
    [1, 5, 4, 1, 4, 8, 1, 8, 3],
    [2, 10, 5, 2, 5, 4, 2, 4, 0],
    [4, 8, 11, 4, 11, 10, 4, 10, 5],
    [0, 9, 5, 0, 5, 7, 0, 7, 3],
    [1, 5, 7, 1, 7, 8, 1, 8, 0],
    [2, 10, 5, 2, 5, 7, 2, 7, 3],
    [1, 5, 7, 1, 7, 11, 1, 11, 2],
    [2, 6, 5, 2, 5, 9, 2, 9, 0],
    [3, 11, 6, 3, 6, 5, 3, 5, 1],
    [5, 9, 8, 5, 8, 11, 5, 11, 6],
    [1, 10, 6, 1, 6, 4, 1, 4, 0],
    [2, 6, 4, 2, 4, 9, 2, 9, 1],
    [2, 6, 4, 2, 4, 8, 2, 8, 3],
    [3, 11, 6, 3, 6, 4, 3, 4, 0],
    [7, 8, 9, 7, 9, 10, 7, 10, 6],
    [1, 10, 6, 1, 6, 7, 1, 7, 3],
    [2, 6, 7, 2, 7, 8, 2, 8, 0],
    [0, 8, 7, 0, 7, 6, 0, 6, 2],
    [3, 7, 6, 3, 6, 10, 3, 10, 1],
    [6, 10, 9, 6, 9, 8, 6, 8, 7],
    [0, 4, 6, 0, 6, 11, 0, 11, 3],
    [3, 8, 4, 3, 4, 6, 3, 6, 2],
    [1, 9, 4, 1, 4, 6, 1, 6, 2],
    [0, 4, 6, 0, 6, 10, 0, 10, 1],
    [6, 11, 8, 6, 8, 9, 6, 9, 5],
    [1, 5, 6, 1, 6, 11, 1, 11, 3],
    [0, 9, 5, 0, 5, 6, 0, 6, 2],
    [2, 11, 7, 2, 7, 5, 2, 5, 1],
    [3, 7, 5, 3, 5, 10, 3, 10, 2],
    [0, 8, 7, 0, 7, 5, 0, 5, 1],
    [3, 7, 5, 3, 5, 9, 3, 9, 0],
    [5, 10, 11, 5, 11, 8, 5, 8, 4],
    [0, 4, 5, 0, 5, 10, 0, 10, 2],
    [3, 8, 4, 3, 4, 5, 3, 5, 1],
    [4, 9, 10, 4, 10, 11, 4, 11, 7],
    [2, 11, 7, 2, 7, 4, 2, 4, 0],
    [3, 7, 4, 3, 4, 9, 3, 9, 1],
    [0, 9, 10, 0, 10, 11, 0, 11, 3],
    [1, 10, 11, 1, 11, 8, 1, 8, 0],
    [2, 11, 8, 2, 8, 9, 2, 9, 1],
    [3, 8, 9, 3, 9, 10, 3, 10, 2],
];

#[rustfmt::skip]
pub static TEST6: [[i8; 3]; 48] = [
    [5, 7, 8],
    [1, 7, 1],
    [4, 7, 2],
    [1, 7, 3],
    [5, 7, 9],
    [2, 7, 2],
    [2, 7, 4],
    [4, 7, 4],
    [-2, -7, 6],
    [-4, -7, 6],
    [2, 7, 0],
    [5, 7, 10],
    [3, 7, 3],
    [6, 7, 8],
    [6, 7, 10],
    [-6, -7, 11],
    [-6, -7, 9],
    [1, 7, 5],
    [3, 7, 5],
    [-3, -7, 7],
    [-1, -7, 7],
    [-5, -7, 11],
    [-3, -7, 1],
    [-4, -7, 0],
    [4, 7, 0],
    [3, 7, 1],
    [5, 7, 11],
    [1, 7, 7],
    [3, 7, 7],
    [-3, -7, 5],
    [-1, -7, 5],
    [6, 7, 9],
    [6, 7, 11],
    [-6, -7, 10],
    [-6, -7, 8],
    [-3, -7, 3],
    [-5, -7, 10],
    [-2, -7, 0],
    [4, 7, 6],
    [2, 7, 6],
    [-4, -7, 4],
    [-2, -7, 4],
    [-2, -7, 2],
    [-5, -7, 9],
    [-1, -7, 3],
    [-4, -7, 2],
    [-1, -7, 1],
    [-5, -7, 8],
];

#[rustfmt::skip]
pub static TILING6_1_1: [[i8; 9]; 48] = [
    [0, 4, 7, 0, 7, 3, 2, 10, 1],
    [2, 10, 9, 2, 9, 0, 7, 8, 4],
    [3, 11, 10, 3, 10, 1, 7, 8, 4],
    [0, 8, 11, 0, 11, 2, 4, 9, 5],
    [1, 5, 4, 1, 4, 0, 3, 11, 2],
    [3, 11, 10, 3, 10, 1, 4, 9, 5],
    [2, 10, 1, 7, 8, 9, 7, 9, 5],
    [3, 11, 2, 7, 8, 9, 7, 9, 5],
    [0, 9, 1, 7, 11, 10, 7, 10, 5],
    [3, 8, 0, 7, 11, 10, 7, 10, 5],
    [1, 9, 8, 1, 8, 3, 5, 10, 6],
    [0, 8, 3, 2, 6, 5, 2, 5, 1],
    [0, 8, 11, 0, 11, 2, 5, 10, 6],
    [0, 4, 7, 0, 7, 3, 5, 10, 6],
    [2, 6, 5, 2, 5, 1, 7, 8, 4],
    [2, 6, 7, 2, 7, 3, 5, 9, 4],
    [0, 4, 5, 0, 5, 1, 7, 11, 6],
    [0, 8, 3, 4, 9, 10, 4, 10, 6],
    [3, 11, 2, 4, 9, 10, 4, 10, 6],
    [1, 10, 2, 4, 8, 11, 4, 11, 6],
    [0, 9, 1, 4, 8, 11, 4, 11, 6],
    [0, 9, 1, 2, 6, 7, 2, 7, 3],
    [0, 9, 10, 0, 10, 2, 7, 11, 6],
    [3, 8, 9, 3, 9, 1, 7, 11, 6],
    [1, 9, 8, 1, 8, 3, 6, 11, 7],
    [2, 10, 9, 2, 9, 0, 6, 11, 7],
    [1, 9, 0, 3, 7, 6, 3, 6, 2],
    [1, 9, 0, 6, 11, 8, 6, 8, 4],
    [2, 10, 1, 6, 11, 8, 6, 8, 4],
    [2, 11, 3, 6, 10, 9, 6, 9, 4],
    [3, 8, 0, 6, 10, 9, 6, 9, 4],
    [1, 5, 4, 1, 4, 0, 6, 11, 7],
    [3, 7, 6, 3, 6, 2, 4, 9, 5],
    [1, 5, 6, 1, 6, 2, 4, 8, 7],
    [3, 7, 4, 3, 4, 0, 6, 10, 5],
    [2, 11, 8, 2, 8, 0, 6, 10, 5],
    [3, 8, 0, 1, 5, 6, 1, 6, 2],
    [3, 8, 9, 3, 9, 1, 6, 10, 5],
    [0, 8, 3, 5, 10, 11, 5, 11, 7],
    [1, 9, 0, 5, 10, 11, 5, 11, 7],
    [2, 11, 3, 5, 9, 8, 5, 8, 7],
    [1, 10, 2, 5, 9, 8, 5, 8, 7],
    [1, 10, 11, 1, 11, 3, 5, 9, 4],
    [0, 4, 5, 0, 5, 1, 2, 11, 3],
    [2, 11, 8, 2, 8, 0, 5, 9, 4],
    [1, 10, 11, 1, 11, 3, 4, 8, 7],
    [0, 9, 10, 0, 10, 2, 4, 8, 7],
    [3, 7, 4, 3, 4, 0, 1, 10, 2],
];

#[rustfmt::skip]
pub static TILING6_1_2: [[i8; 27]; 48] = [
    [0, 4, 12, 4, 1, 12, 1, 0, 12, 4, 10, 1, 4, 7, 10, 7, 3, 10, 3, 2, 10, 3, 0, 2, 0, 1, 2],
    [2, 7, 12, 7, 8, 12, 8, 2, 12, 2, 10, 7, 10, 9, 7, 9, 4, 7, 9, 0, 4, 0, 8, 4, 0, 2, 8],
    [3, 11, 12, 11, 8, 12, 8, 3, 12, 11, 7, 8, 11, 10, 7, 10, 4, 7, 10, 1, 4, 1, 3, 4, 3, 8, 4],
    [0, 8, 12, 8, 9, 12, 9, 0, 12, 8, 4, 9, 8, 11, 4, 11, 5, 4, 11, 2, 5, 2, 0, 5, 0, 9, 5],
    [1, 5, 12, 5, 2, 12, 2, 1, 12, 5, 11, 2, 5, 4, 11, 4, 0, 11, 0, 3, 11, 0, 1, 3, 1, 2, 3],
    [3, 4, 12, 4, 9, 12, 9, 3, 12, 3, 11, 4, 11, 10, 4, 10, 5, 4, 10, 1, 5, 1, 9, 5, 1, 3, 9],
    [2, 10, 12, 10, 5, 12, 5, 2, 12, 10, 1, 5, 1, 9, 5, 1, 2, 9, 2, 8, 9, 2, 7, 8, 2, 5, 7],
    [3, 11, 12, 11, 8, 12, 8, 3, 12, 11, 7, 8, 11, 2, 7, 2, 3, 7, 3, 5, 7, 3, 9, 5, 3, 8, 9],
    [12, 9, 5, 12, 0, 9, 12, 5, 0, 9, 1, 5, 1, 10, 5, 1, 0, 10, 0, 11, 10, 0, 7, 11, 0, 5, 7],
    [12, 8, 11, 12, 3, 8, 12, 11, 3, 8, 7, 11, 8, 0, 7, 0, 3, 7, 3, 5, 7, 3, 10, 5, 3, 11, 10],
    [1, 9, 12, 9, 10, 12, 10, 1, 12, 9, 5, 10, 9, 8, 5, 8, 6, 5, 8, 3, 6, 3, 1, 6, 1, 10, 6],
    [0, 8, 12, 8, 5, 12, 5, 0, 12, 8, 6, 5, 8, 3, 6, 3, 2, 6, 3, 0, 2, 0, 1, 2, 0, 5, 1],
    [0, 5, 12, 5, 10, 12, 10, 0, 12, 0, 8, 5, 8, 11, 5, 11, 6, 5, 11, 2, 6, 2, 10, 6, 2, 0, 10],
    [0, 4, 12, 4, 10, 12, 10, 0, 12, 4, 5, 10, 4, 7, 5, 7, 6, 5, 7, 3, 6, 3, 10, 6, 3, 0, 10],
    [2, 6, 12, 6, 8, 12, 8, 2, 12, 6, 7, 8, 6, 5, 7, 5, 4, 7, 5, 1, 4, 1, 8, 4, 1, 2, 8],
    [12, 6, 9, 12, 2, 6, 12, 9, 2, 6, 5, 9, 6, 7, 5, 7, 4, 5, 7, 3, 4, 3, 9, 4, 3, 2, 9],
    [12, 4, 11, 12, 0, 4, 12, 11, 0, 4, 7, 11, 4, 5, 7, 5, 6, 7, 5, 1, 6, 1, 11, 6, 1, 0, 11],
    [0, 8, 12, 8, 9, 12, 9, 0, 12, 8, 4, 9, 8, 3, 4, 3, 0, 4, 0, 6, 4, 0, 10, 6, 0, 9, 10],
    [3, 11, 12, 11, 6, 12, 6, 3, 12, 11, 2, 6, 2, 10, 6, 2, 3, 10, 3, 9, 10, 3, 4, 9, 3, 6, 4],
    [12, 10, 6, 12, 1, 10, 12, 6, 1, 10, 2, 6, 2, 11, 6, 2, 1, 11, 1, 8, 11, 1, 4, 8, 1, 6, 4],
    [12, 9, 8, 12, 0, 9, 12, 8, 0, 9, 4, 8, 9, 1, 4, 1, 0, 4, 0, 6, 4, 0, 11, 6, 0, 8, 11],
    [12, 9, 7, 12, 0, 9, 12, 7, 0, 9, 6, 7, 9, 1, 6, 1, 2, 6, 1, 0, 2, 0, 3, 2, 0, 7, 3],
    [12, 7, 11, 12, 0, 7, 12, 11, 0, 0, 9, 7, 9, 10, 7, 10, 6, 7, 10, 2, 6, 2, 11, 6, 2, 0, 11],
    [12, 8, 11, 12, 3, 8, 12, 11, 3, 8, 7, 11, 8, 9, 7, 9, 6, 7, 9, 1, 6, 1, 3, 6, 3, 11, 6],
    [1, 6, 12, 6, 11, 12, 11, 1, 12, 1, 9, 6, 9, 8, 6, 8, 7, 6, 8, 3, 7, 3, 11, 7, 3, 1, 11],
    [2, 10, 12, 10, 11, 12, 11, 2, 12, 10, 6, 11, 10, 9, 6, 9, 7, 6, 9, 0, 7, 0, 2, 7, 2, 11, 7],
    [1, 9, 12, 9, 6, 12, 6, 1, 12, 9, 7, 6, 9, 0, 7, 0, 3, 7, 0, 1, 3, 1, 2, 3, 1, 6, 2],
    [1, 9, 12, 9, 4, 12, 4, 1, 12, 9, 0, 4, 0, 8, 4, 0, 1, 8, 1, 11, 8, 1, 6, 11, 1, 4, 6],
    [2, 10, 12, 10, 11, 12, 11, 2, 12, 10, 6, 11, 10, 1, 6, 1, 2, 6, 2, 4, 6, 2, 8, 4, 2, 11, 8],
    [12, 11, 10, 12, 2, 11, 12, 10, 2, 11, 6, 10, 11, 3, 6, 3, 2, 6, 2, 4, 6, 2, 9, 4, 2, 10, 9],
    [12, 8, 4, 12, 3, 8, 12, 4, 3, 8, 0, 4, 0, 9, 4, 0, 3, 9, 3, 10, 9, 3, 6, 10, 3, 4, 6],
    [1, 5, 12, 5, 11, 12, 11, 1, 12, 5, 6, 11, 5, 4, 6, 4, 7, 6, 4, 0, 7, 0, 11, 7, 0, 1, 11],
    [3, 7, 12, 7, 9, 12, 9, 3, 12, 7, 4, 9, 7, 6, 4, 6, 5, 4, 6, 2, 5, 2, 9, 5, 2, 3, 9],
    [12, 5, 8, 12, 1, 5, 12, 8, 1, 5, 4, 8, 5, 6, 4, 6, 7, 4, 6, 2, 7, 2, 8, 7, 2, 1, 8],
    [12, 7, 10, 12, 3, 7, 12, 10, 3, 7, 6, 10, 7, 4, 6, 4, 5, 6, 4, 0, 5, 0, 10, 5, 0, 3, 10],
    [12, 11, 10, 12, 2, 11, 12, 10, 2, 11, 6, 10, 11, 8, 6, 8, 5, 6, 8, 0, 5, 0, 2, 5, 2, 10, 5],
    [12, 8, 6, 12, 3, 8, 12, 6, 3, 8, 5, 6, 8, 0, 5, 0, 1, 5, 0, 3, 1, 3, 2, 1, 3, 6, 2],
    [12, 6, 10, 12, 3, 6, 12, 10, 3, 3, 8, 6, 8, 9, 6, 9, 5, 6, 9, 1, 5, 1, 10, 5, 1, 3, 10],
    [0, 8, 12, 8, 7, 12, 7, 0, 12, 8, 3, 7, 3, 11, 7, 3, 0, 11, 0, 10, 11, 0, 5, 10, 0, 7, 5],
    [1, 9, 12, 9, 10, 12, 10, 1, 12, 9, 5, 10, 9, 0, 5, 0, 1, 5, 1, 7, 5, 1, 11, 7, 1, 10, 11],
    [12, 11, 7, 12, 2, 11, 12, 7, 2, 11, 3, 7, 3, 8, 7, 3, 2, 8, 2, 9, 8, 2, 5, 9, 2, 7, 5],
    [12, 10, 9, 12, 1, 10, 12, 9, 1, 10, 5, 9, 10, 2, 5, 2, 1, 5, 1, 7, 5, 1, 8, 7, 1, 9, 8],
    [12, 10, 9, 12, 1, 10, 12, 9, 1, 10, 5, 9, 10, 11, 5, 11, 4, 5, 11, 3, 4, 3, 1, 4, 1, 9, 4],
    [12, 4, 3, 12, 0, 4, 12, 3, 0, 4, 11, 3, 4, 5, 11, 5, 1, 11, 1, 2, 11, 1, 0, 2, 0, 3, 2],
    [12, 5, 9, 12, 2, 5, 12, 9, 2, 2, 11, 5, 11, 8, 5, 8, 4, 5, 8, 0, 4, 0, 9, 4, 0, 2, 9],
    [12, 4, 8, 12, 1, 4, 12, 8, 1, 1, 10, 4, 10, 11, 4, 11, 7, 4, 11, 3, 7, 3, 8, 7, 3, 1, 8],
    [12, 9, 8, 12, 0, 9, 12, 8, 0, 9, 4, 8, 9, 10, 4, 10, 7, 4, 10, 2, 7, 2, 0, 7, 0, 8, 7],
    [12, 7, 2, 12, 3, 7, 12, 2, 3, 7, 10, 2, 7, 4, 10, 4, 0, 10, 0, 1, 10, 0, 3, 1, 3, 2, 1],
];

#[rustfmt::skip]
pub static TILING6_2: [[i8; 15]; 48] = [
    [0, 4, 7, 0, 7, 3, 2, 10, 1, 3, 2, 1, 3, 1, 0],
    [2, 10, 9, 2, 9, 0, 7, 8, 4, 9, 4, 8, 0, 9, 8],
    [3, 11, 10, 3, 10, 1, 7, 8, 4, 8, 7, 11, 3, 8, 11],
    [0, 8, 11, 0, 11, 2, 4, 9, 5, 9, 4, 8, 0, 9, 8],
    [1, 5, 4, 1, 4, 0, 3, 11, 2, 3, 2, 1, 3, 1, 0],
    [3, 11, 10, 3, 10, 1, 4, 9, 5, 10, 5, 9, 1, 10, 9],
    [2, 10, 1, 7, 8, 9, 7, 9, 5, 10, 5, 9, 1, 10, 9],
    [3, 11, 2, 7, 8, 9, 7, 9, 5, 8, 7, 11, 3, 8, 11],
    [0, 9, 5, 0, 5, 7, 0, 7, 11, 0, 11, 10, 0, 10, 1],
    [3, 11, 10, 3, 10, 5, 3, 5, 7, 3, 7, 8, 3, 8, 0],
    [1, 9, 8, 1, 8, 3, 5, 10, 6, 10, 5, 9, 1, 10, 9],
    [0, 8, 3, 2, 6, 5, 2, 5, 1, 3, 2, 1, 3, 1, 0],
    [0, 8, 11, 0, 11, 2, 5, 10, 6, 11, 6, 10, 2, 11, 10],
    [0, 4, 7, 0, 7, 3, 5, 10, 6, 5, 6, 7, 4, 5, 7],
    [2, 6, 5, 2, 5, 1, 7, 8, 4, 5, 6, 7, 4, 5, 7],
    [2, 6, 5, 2, 5, 9, 2, 9, 4, 2, 4, 7, 2, 7, 3],
    [0, 4, 7, 0, 7, 11, 0, 11, 6, 0, 6, 5, 0, 5, 1],
    [0, 8, 3, 4, 9, 10, 4, 10, 6, 9, 4, 8, 0, 9, 8],
    [3, 11, 2, 4, 9, 10, 4, 10, 6, 11, 6, 10, 2, 11, 10],
    [1, 10, 6, 1, 6, 4, 1, 4, 8, 1, 8, 11, 1, 11, 2],
    [0, 8, 11, 0, 11, 6, 0, 6, 4, 0, 4, 9, 0, 9, 1],
    [0, 9, 1, 0, 1, 2, 0, 2, 6, 0, 6, 7, 0, 7, 3],
    [0, 9, 10, 0, 10, 6, 0, 6, 7, 0, 7, 11, 0, 11, 2],
    [3, 11, 6, 3, 6, 7, 3, 7, 8, 3, 8, 9, 3, 9, 1],
    [1, 9, 8, 1, 8, 3, 6, 11, 7, 8, 7, 11, 3, 8, 11],
    [2, 10, 9, 2, 9, 0, 6, 11, 7, 11, 6, 10, 2, 11, 10],
    [1, 9, 0, 3, 7, 6, 3, 6, 2, 3, 2, 1, 3, 1, 0],
    [1, 9, 0, 6, 11, 8, 6, 8, 4, 9, 4, 8, 0, 9, 8],
    [2, 10, 1, 6, 11, 8, 6, 8, 4, 11, 6, 10, 2, 11, 10],
    [2, 10, 9, 2, 9, 4, 2, 4, 6, 2, 6, 11, 2, 11, 3],
    [3, 8, 4, 3, 4, 6, 3, 6, 10, 3, 10, 9, 3, 9, 0],
    [1, 5, 4, 1, 4, 0, 6, 11, 7, 5, 6, 7, 4, 5, 7],
    [3, 7, 6, 3, 6, 2, 4, 9, 5, 5, 6, 7, 4, 5, 7],
    [1, 5, 4, 1, 4, 8, 1, 8, 7, 1, 7, 6, 1, 6, 2],
    [3, 7, 6, 3, 6, 10, 3, 10, 5, 3, 5, 4, 3, 4, 0],
    [2, 10, 5, 2, 5, 6, 2, 6, 11, 2, 11, 8, 2, 8, 0],
    [1, 5, 6, 1, 6, 2, 1, 2, 3, 1, 3, 8, 1, 8, 0],
    [3, 8, 9, 3, 9, 5, 3, 5, 6, 3, 6, 10, 3, 10, 1],
    [0, 8, 3, 5, 10, 11, 5, 11, 7, 8, 7, 11, 3, 8, 11],
    [1, 9, 0, 5, 10, 11, 5, 11, 7, 10, 5, 9, 1, 10, 9],
    [2, 11, 7, 2, 7, 5, 2, 5, 9, 2, 9, 8, 2, 8, 3],
    [1, 9, 8, 1, 8, 7, 1, 7, 5, 1, 5, 10, 1, 10, 2],
    [1, 9, 4, 1, 4, 5, 1, 5, 10, 1, 10, 11, 1, 11, 3],
    [0, 4, 5, 0, 5, 1, 0, 1, 2, 0, 2, 11, 0, 11, 3],
    [2, 11, 8, 2, 8, 4, 2, 4, 5, 2, 5, 9, 2, 9, 0],
    [1, 10, 11, 1, 11, 7, 1, 7, 4, 1, 4, 8, 1, 8, 3],
    [0, 8, 7, 0, 7, 4, 0, 4, 9, 0, 9, 10, 0, 10, 2],
    [1, 10, 2, 1, 2, 3, 1, 3, 7, 1, 7, 4, 1, 4, 0],
];

#[rustfmt::skip]
pub static TEST7: [[i8; 5]; 16] = [
    [1, 4, 5, 7, 8],
    [1, 2, 5, 7, 9],
    [2, 3, 5, 7, 10],
    [1, 2, 6, 7, 9],
    [3, 4, 6, 7, 11],
    [-2, -3, -6, -7, 10],
    [-1, -4, -6, -7, 8],
    [-3, -4, -5, -7, 11],
    [3, 4, 5, 7, 11],
    [1, 4, 6, 7, 8],
    [2, 3, 6, 7, 10],
    [-3, -4, -6, -7, 11],
    [-1, -2, -6, -7, 9],
    [-2, -3, -5, -7, 10],
    [-1, -2, -5, -7, 9],
    [-1, -4, -5, -7, 8],
];

#[rustfmt::skip]
pub static TILING7_1: [[i8; 9]; 16] = [
    [1, 9, 0, 3, 11, 2, 7, 8, 4],
    [0, 8, 3, 2, 10, 1, 4, 9, 5],
    [1, 9, 0, 3, 11, 2, 5, 10, 6],
    [1, 9, 0, 7, 8, 4, 5, 10, 6],
    [3, 11, 2, 7, 8, 4, 5, 10, 6],
    [1, 10, 2, 5, 9, 4, 7, 11, 6],
    [3, 8, 0, 5, 9, 4, 7, 11, 6],
    [3, 8, 0, 1, 10, 2, 7, 11, 6],
    [0, 8, 3, 2, 10, 1, 6, 11, 7],
    [0, 8, 3, 4, 9, 5, 6, 11, 7],
    [2, 10, 1, 4, 9, 5, 6, 11, 7],
    [2, 11, 3, 4, 8, 7, 6, 10, 5],
    [0, 9, 1, 4, 8, 7, 6, 10, 5],
    [0, 9, 1, 2, 11, 3, 6, 10, 5],
    [3, 8, 0, 1, 10, 2, 5, 9, 4],
    [0, 9, 1, 2, 11, 3, 4, 8, 7],
];

#[rustfmt::skip]
pub static TILING7_2: [[[i8; 15]; 3]; 16] = [
    [
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 9, 4, 8, 0, 9, 8],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 8, 7, 11, 3, 8, 11],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 3, 2, 1, 3, 1, 0],
    ],
    [
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 9, 4, 8, 0, 9, 8],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 10, 5, 9, 1, 10, 9],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 3, 2, 1, 3, 1, 0],
    ],
    [
        [1, 9, 0, 3, 11, 2, 5, 10, 6, 10, 5, 9, 1, 10, 9],
        [1, 9, 0, 3, 11, 2, 5, 10, 6, 11, 6, 10, 2, 11, 10],
        [1, 9, 0, 3, 11, 2, 5, 10, 6, 3, 2, 1, 3, 1, 0],
    ],
    [
        [1, 9, 0, 7, 8, 4, 5, 10, 6, 9, 4, 8, 0, 9, 8],
        [1, 9, 0, 7, 8, 4, 5, 10, 6, 10, 5, 9, 1, 10, 9],
        [1, 9, 0, 7, 8, 4, 5, 10, 6, 5, 6, 7, 4, 5, 7],
    ],
    [
        [3, 11, 2, 7, 8, 4, 5, 10, 6, 11, 6, 10, 2, 11, 10],
        [3, 11, 2, 7, 8, 4, 5, 10, 6, 8, 7, 11, 3, 8, 11],
        [3, 11, 2, 7, 8, 4, 5, 10, 6, 5, 6, 7, 4, 5, 7],
    ],
    [
        [1, 9, 4, 1, 4, 5, 1, 5, 10, 1, 10, 2, 7, 11, 6],
        [1, 10, 6, 1, 6, 7, 1, 7, 11, 1, 11, 2, 5, 9, 4],
        [1, 10, 2, 7, 11, 6, 7, 6, 5, 7, 5, 9, 7, 9, 4],
    ],
    [
        [3, 8, 4, 3, 4, 5, 3, 5, 9, 3, 9, 0, 7, 11, 6],
        [3, 11, 6, 3, 6, 7, 3, 7, 8, 3, 8, 0, 5, 9, 4],
        [3, 8, 0, 7, 11, 6, 7, 6, 5, 7, 5, 9, 7, 9, 4],
    ],
    [
        [3, 8, 0, 1, 10, 6, 1, 6, 7, 1, 7, 11, 1, 11, 2],
        [3, 11, 6, 3, 6, 7, 3, 7, 8, 3, 8, 0, 1, 10, 2],
        [1, 10, 2, 1, 2, 3, 1, 3, 8, 1, 8, 0, 7, 11, 6],
    ],
    [
        [0, 8, 3, 2, 10, 1, 6, 11, 7, 11, 6, 10, 2, 11, 10],
        [0, 8, 3, 2, 10, 1, 6, 11, 7, 8, 7, 11, 3, 8, 11],
        [0, 8, 3, 2, 10, 1, 6, 11, 7, 3, 2, 1, 3, 1, 0],
    ],
    [
        [0, 8, 3, 4, 9, 5, 6, 11, 7, 9, 4, 8, 0, 9, 8],
        [0, 8, 3, 4, 9, 5, 6, 11, 7, 8, 7, 11, 3, 8, 11],
        [0, 8, 3, 4, 9, 5, 6, 11, 7, 5, 6, 7, 4, 5, 7],
    ],
    [
        [2, 10, 1, 4, 9, 5, 6, 11, 7, 10, 5, 9, 1, 10, 9],
        [2, 10, 1, 4, 9, 5, 6, 11, 7, 11, 6, 10, 2, 11, 10],
        [2, 10, 1, 4, 9, 5, 6, 11, 7, 5, 6, 7, 4, 5, 7],
    ],
    [
        [2, 10, 5, 2, 5, 6, 2, 6, 11, 2, 11, 3, 4, 8, 7],
        [2, 11, 7, 2, 7, 4, 2, 4, 8, 2, 8, 3, 6, 10, 5],
        [2, 11, 3, 4, 8, 7, 4, 7, 6, 4, 6, 10, 4, 10, 5],
    ],
    [
        [0, 8, 7, 0, 7, 4, 0, 4, 9, 0, 9, 1, 6, 10, 5],
        [0, 9, 5, 0, 5, 6, 0, 6, 10, 0, 10, 1, 4, 8, 7],
        [0, 9, 1, 4, 8, 7, 4, 7, 6, 4, 6, 10, 4, 10, 5],
    ],
    [
        [0, 9, 5, 0, 5, 6, 0, 6, 10, 0, 10, 1, 2, 11, 3],
        [0, 9, 1, 2, 10, 5, 2, 5, 6, 2, 6, 11, 2, 11, 3],
        [0, 9, 1, 0, 1, 2, 0, 2, 11, 0, 11, 3, 6, 10, 5],
    ],
    [
        [3, 8, 4, 3, 4, 5, 3, 5, 9, 3, 9, 0, 1, 10, 2],
        [3, 8, 0, 1, 9, 4, 1, 4, 5, 1, 5, 10, 1, 10, 2],
        [1, 10, 2, 1, 2, 3, 1, 3, 8, 1, 8, 0, 5, 9, 4],
    ],
    [
        [0, 8, 7, 0, 7, 4, 0, 4, 9, 0, 9, 1, 2, 11, 3],
        [0, 9, 1, 2, 11, 7, 2, 7, 4, 2, 4, 8, 2, 8, 3],
        [0, 9, 1, 0, 1, 2, 0, 2, 11, 0, 11, 3, 4, 8, 7],
    ],
];

#[rustfmt::skip]
pub static TILING7_3: [[[i8; 27]; 3]; 16] = [
    [
        [12, 1, 9, 12, 9, 4, 12, 4, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1],
        [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3],
        [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3],
    ],
    [
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 10, 12, 10, 5, 12, 5, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0],
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0],
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0],
    ],
    [
        [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 11, 12, 11, 6, 12, 6, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1],
        [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 0, 12, 0, 3],
        [12, 3, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3],
    ],
    [
        [12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 1],
        [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 8, 12, 8, 0, 12, 0, 1],
        [12, 1, 10, 12, 10, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1],
    ],
    [
        [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 3],
        [12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 10, 12, 10, 2, 12, 2, 3],
        [12, 3, 8, 12, 8, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3],
    ],
    [
        [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 1],
        [12, 1, 9, 12, 9, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1],
        [12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 11, 12, 11, 2, 12, 2, 1],
    ],
    [
        [12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 3],
        [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 9, 12, 9, 0, 12, 0, 3],
        [12, 3, 11, 12, 11, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3],
    ],
    [
        [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 10, 12, 10, 6, 12, 6, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3],
        [12, 1, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1],
        [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 0, 12, 0, 1],
    ],
    [
        [12, 0, 8, 12, 8, 7, 12, 7, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0],
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 1, 12, 1, 0],
        [12, 0, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0],
    ],
    [
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 0],
        [12, 0, 9, 12, 9, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0],
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 11, 12, 11, 3, 12, 3, 0],
    ],
    [
        [12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 2],
        [12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 9, 12, 9, 1, 12, 1, 2],
        [12, 2, 11, 12, 11, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2],
    ],
    [
        [12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 2],
        [12, 2, 10, 12, 10, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2],
        [12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 8, 12, 8, 3, 12, 3, 2],
    ],
    [
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 0],
        [12, 0, 8, 12, 8, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0],
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 10, 12, 10, 1, 12, 1, 0],
    ],
    [
        [12, 0, 9, 12, 9, 5, 12, 5, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0],
        [12, 0, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0],
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 3, 12, 3, 0],
    ],
    [
        [12, 3, 8, 12, 8, 4, 12, 4, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3],
        [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1],
        [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1],
    ],
    [
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 11, 12, 11, 7, 12, 7, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0],
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0],
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0],
    ],
];

#[rustfmt::skip]
pub static TILING7_4_1: [[i8; 15]; 16] = [
    [3, 8, 0, 1, 9, 4, 1, 4, 7, 1, 7, 11, 1, 11, 2],
    [0, 9, 1, 2, 10, 5, 2, 5, 4, 2, 4, 8, 2, 8, 3],
    [3, 11, 6, 3, 6, 5, 3, 5, 9, 3, 9, 0, 1, 10, 2],
    [1, 10, 6, 1, 6, 7, 1, 7, 8, 1, 8, 0, 5, 9, 4],
    [3, 8, 4, 3, 4, 5, 3, 5, 10, 3, 10, 2, 7, 11, 6],
    [1, 9, 4, 1, 4, 7, 1, 7, 11, 1, 11, 2, 5, 10, 6],
    [3, 11, 6, 3, 6, 5, 3, 5, 9, 3, 9, 0, 7, 8, 4],
    [1, 10, 6, 1, 6, 7, 1, 7, 8, 1, 8, 0, 3, 11, 2],
    [0, 8, 7, 0, 7, 6, 0, 6, 10, 0, 10, 1, 2, 11, 3],
    [0, 9, 5, 0, 5, 6, 0, 6, 11, 0, 11, 3, 4, 8, 7],
    [2, 11, 7, 2, 7, 4, 2, 4, 9, 2, 9, 1, 6, 10, 5],
    [2, 10, 5, 2, 5, 4, 2, 4, 8, 2, 8, 3, 6, 11, 7],
    [0, 8, 7, 0, 7, 6, 0, 6, 10, 0, 10, 1, 4, 9, 5],
    [0, 9, 5, 0, 5, 6, 0, 6, 11, 0, 11, 3, 2, 10, 1],
    [1, 9, 0, 3, 8, 4, 3, 4, 5, 3, 5, 10, 3, 10, 2],
    [0, 8, 3, 2, 11, 7, 2, 7, 4, 2, 4, 9, 2, 9, 1],
];

#[rustfmt::skip]
pub static TILING7_4_2: [[i8; 27]; 16] = [
    [3, 11, 2, 3, 8, 11, 8, 7, 11, 8, 4, 7, 8, 0, 4, 0, 9, 4, 0, 1, 9, 0, 3, 1, 3, 2, 1],
    [0, 8, 3, 0, 9, 8, 9, 4, 8, 9, 5, 4, 9, 1, 5, 1, 10, 5, 1, 2, 10, 1, 0, 2, 0, 3, 2],
    [3, 11, 2, 11, 6, 2, 6, 10, 2, 6, 5, 10, 5, 9, 10, 9, 1, 10, 9, 0, 1, 0, 3, 1, 3, 2, 1],
    [1, 10, 9, 10, 5, 9, 10, 6, 5, 6, 7, 5, 7, 4, 5, 7, 8, 4, 8, 0, 4, 0, 9, 4, 0, 1, 9],
    [3, 8, 11, 8, 7, 11, 8, 4, 7, 4, 5, 7, 5, 6, 7, 5, 10, 6, 10, 2, 6, 2, 11, 6, 2, 3, 11],
    [1, 9, 10, 9, 5, 10, 9, 4, 5, 4, 7, 5, 7, 6, 5, 7, 11, 6, 11, 2, 6, 2, 10, 6, 2, 1, 10],
    [3, 11, 8, 11, 7, 8, 11, 6, 7, 6, 5, 7, 5, 4, 7, 5, 9, 4, 9, 0, 4, 0, 8, 4, 0, 3, 8],
    [1, 10, 2, 10, 6, 2, 6, 11, 2, 6, 7, 11, 7, 8, 11, 8, 3, 11, 8, 0, 3, 0, 1, 3, 1, 2, 3],
    [0, 8, 3, 8, 7, 3, 7, 11, 3, 7, 6, 11, 6, 10, 11, 10, 2, 11, 10, 1, 2, 1, 0, 2, 0, 3, 2],
    [0, 9, 8, 9, 4, 8, 9, 5, 4, 5, 6, 4, 6, 7, 4, 6, 11, 7, 11, 3, 7, 3, 8, 7, 3, 0, 8],
    [2, 11, 10, 11, 6, 10, 11, 7, 6, 7, 4, 6, 4, 5, 6, 4, 9, 5, 9, 1, 5, 1, 10, 5, 1, 2, 10],
    [2, 10, 11, 10, 6, 11, 10, 5, 6, 5, 4, 6, 4, 7, 6, 4, 8, 7, 8, 3, 7, 3, 11, 7, 3, 2, 11],
    [0, 8, 9, 8, 4, 9, 8, 7, 4, 7, 6, 4, 6, 5, 4, 6, 10, 5, 10, 1, 5, 1, 9, 5, 1, 0, 9],
    [0, 9, 1, 9, 5, 1, 5, 10, 1, 5, 6, 10, 6, 11, 10, 11, 2, 10, 11, 3, 2, 3, 0, 2, 0, 1, 2],
    [1, 10, 2, 1, 9, 10, 9, 5, 10, 9, 4, 5, 9, 0, 4, 0, 8, 4, 0, 3, 8, 0, 1, 3, 1, 2, 3],
    [0, 9, 1, 0, 8, 9, 8, 4, 9, 8, 7, 4, 8, 3, 7, 3, 11, 7, 3, 2, 11, 3, 0, 2, 0, 1, 2],
];

#[rustfmt::skip]
pub static TILING8: [[i8; 6]; 6] = [
    [11, 10, 9, 11, 9, 8],
    [1, 5, 7, 1, 7, 3],
    [2, 6, 4, 2, 4, 0],
    [0, 4, 6, 0, 6, 2],
    [3, 7, 5, 3, 5, 1],
    [8, 9, 10, 8, 10, 11],
];

#[rustfmt::skip]
pub static TILING9: [[i8; 12]; 8] = [
    [1, 9, 4, 1, 4, 7, 1, 7, 11, 1, 11, 2],
    [2, 10, 5, 2, 5, 4, 2, 4, 8, 2, 8, 3],
    [3, 11, 6, 3, 6, 5, 3, 5, 9, 3, 9, 0],
    [1, 10, 6, 1, 6, 7, 1, 7, 8, 1, 8, 0],
    [0, 8, 7, 0, 7, 6, 0, 6, 10, 0, 10, 1],
    [0, 9, 5, 0, 5, 6, 0, 6, 11, 0, 11, 3],
    [3, 8, 4, 3, 4, 5, 3, 5, 10, 3, 10, 2],
    [2, 11, 7, 2, 7, 4, 2, 4, 9, 2, 9, 1],
];

#[rustfmt::skip]
pub static TEST10: [[i8; 3]; 6] = [
    [2, 4, 7],
    [5, 6, 7],
    [1, 3, 7],
    [1, 3, 7],
    [5, 6, 7],
    [2, 4, 7],
];

#[rustfmt::skip]
pub static TILING10_1_1: [[i8; 12]; 6] = [
    [3, 11, 10, 3, 10, 1, 7, 8, 9, 7, 9, 5],
    [0, 4, 7, 0, 7, 3, 2, 6, 5, 2, 5, 1],
    [0, 8, 11, 0, 11, 2, 4, 9, 10, 4, 10, 6],
    [2, 10, 9, 2, 9, 0, 6, 11, 8, 6, 8, 4],
    [1, 5, 4, 1, 4, 0, 3, 7, 6, 3, 6, 2],
    [1, 9, 8, 1, 8, 3, 5, 10, 11, 5, 11, 7],
];

#[rustfmt::skip]
pub static TILING10_1_1_INV: [[i8; 12]; 6] = [
    [3, 8, 9, 3, 9, 1, 7, 11, 10, 7, 10, 5],
    [0, 4, 5, 0, 5, 1, 2, 6, 7, 2, 7, 3],
    [0, 9, 10, 0, 10, 2, 4, 8, 11, 4, 11, 6],
    [2, 11, 8, 2, 8, 0, 6, 10, 9, 6, 9, 4],
    [3, 7, 4, 3, 4, 0, 1, 5, 6, 1, 6, 2],
    [1, 10, 11, 1, 11, 3, 5, 9, 8, 5, 8, 7],
];

#[rustfmt::skip]
pub static TILING10_1_2: [[i8; 24]; 6] = [
    [3, 11, 8, 11, 7, 8, 11, 10, 7, 10, 5, 7, 10, 1, 5, 1, 9, 5, 1, 3, 9, 3, 8, 9],
    [0, 4, 1, 4, 5, 1, 4, 7, 5, 7, 6, 5, 7, 3, 6, 3, 2, 6, 3, 0, 2, 0, 1, 2],
    [0, 8, 9, 8, 4, 9, 8, 11, 4, 11, 6, 4, 11, 2, 6, 2, 10, 6, 2, 0, 10, 0, 9, 10],
    [2, 10, 11, 10, 6, 11, 10, 9, 6, 9, 4, 6, 9, 0, 4, 0, 8, 4, 0, 2, 8, 2, 11, 8],
    [1, 5, 2, 5, 6, 2, 5, 4, 6, 4, 7, 6, 4, 0, 7, 0, 3, 7, 0, 1, 3, 1, 2, 3],
    [1, 9, 10, 9, 5, 10, 9, 8, 5, 8, 7, 5, 8, 3, 7, 3, 11, 7, 3, 1, 11, 1, 10, 11],
];

#[rustfmt::skip]
pub static TILING10_2: [[i8; 24]; 6] = [
    [9, 1, 12, 8, 9, 12, 7, 8, 12, 5, 7, 12, 10, 5, 12, 11, 10, 12, 3, 11, 12, 1, 3, 12],
    [12, 0, 4, 12, 4, 7, 12, 7, 3, 12, 3, 2, 12, 2, 6, 12, 6, 5, 12, 5, 1, 12, 1, 0],
    [12, 0, 9, 12, 9, 10, 12, 10, 6, 12, 6, 4, 12, 4, 8, 12, 8, 11, 12, 11, 2, 12, 2, 0],
    [8, 0, 12, 11, 8, 12, 6, 11, 12, 4, 6, 12, 9, 4, 12, 10, 9, 12, 2, 10, 12, 0, 2, 12],
    [4, 0, 12, 5, 4, 12, 1, 5, 12, 2, 1, 12, 6, 2, 12, 7, 6, 12, 3, 7, 12, 0, 3, 12],
    [12, 1, 10, 12, 10, 11, 12, 11, 7, 12, 7, 5, 12, 5, 9, 12, 9, 8, 12, 8, 3, 12, 3, 1],
];

#[rustfmt::skip]
pub static TILING10_2_INV: [[i8; 24]; 6] = [
    [10, 1, 12, 11, 10, 12, 7, 11, 12, 5, 7, 12, 9, 5, 12, 8, 9, 12, 3, 8, 12, 1, 3, 12],
    [12, 0, 4, 12, 4, 5, 12, 5, 1, 12, 1, 2, 12, 2, 6, 12, 6, 7, 12, 7, 3, 12, 3, 0],
    [12, 0, 8, 12, 8, 11, 12, 11, 6, 12, 6, 4, 12, 4, 9, 12, 9, 10, 12, 10, 2, 12, 2, 0],
    [9, 0, 12, 10, 9, 12, 6, 10, 12, 4, 6, 12, 8, 4, 12, 11, 8, 12, 2, 11, 12, 0, 2, 12],
    [4, 0, 12, 7, 4, 12, 3, 7, 12, 2, 3, 12, 6, 2, 12, 5, 6, 12, 1, 5, 12, 0, 1, 12],
    [12, 1, 9, 12, 9, 8, 12, 8, 7, 12, 7, 5, 12, 5, 10, 12, 10, 11, 12, 11, 3, 12, 3, 1],
];

#[rustfmt::skip]
pub static TILING11: [[i8; 12]; 12] = [
    [2, 10, 9, 2, 9, 4, 2, 4, 7, 2, 7, 3],
    [3, 11, 10, 3, 10, 5, 3, 5, 4, 3, 4, 0],
    [0, 9, 5, 0, 5, 7, 0, 7, 11, 0, 11, 2],
    [0, 8, 11, 0, 11, 6, 0, 6, 5, 0, 5, 1],
    [1, 10, 6, 1, 6, 4, 1, 4, 8, 1, 8, 3],
    [2, 6, 7, 2, 7, 8, 2, 8, 9, 2, 9, 1],
    [1, 9, 8, 1, 8, 7, 1, 7, 6, 1, 6, 2],
    [3, 8, 4, 3, 4, 6, 3, 6, 10, 3, 10, 1],
    [1, 5, 6, 1, 6, 11, 1, 11, 8, 1, 8, 0],
    [2, 11, 7, 2, 7, 5, 2, 5, 9, 2, 9, 0],
    [0, 4, 5, 0, 5, 10, 0, 10, 11, 0, 11, 3],
    [3, 7, 4, 3, 4, 9, 3, 9, 10, 3, 10, 2],
];

#[rustfmt::skip]
pub static TEST12: [[i8; 4]; 24] = [
    [1, 4, 7, 8],
    [1, 2, 7, 9],
    [2, 5, 7, 10],
    [4, 5, 7, 11],
    [2, 3, 7, 10],
    [2, 6, 7, 10],
    [1, 6, 7, 9],
    [3, 6, 7, 11],
    [4, 6, 7, 11],
    [1, 5, 7, 9],
    [3, 5, 7, 11],
    [3, 4, 7, 11],
    [3, 4, 7, 11],
    [3, 5, 7, 11],
    [1, 5, 7, 9],
    [4, 6, 7, 11],
    [3, 6, 7, 11],
    [1, 6, 7, 9],
    [2, 6, 7, 10],
    [2, 3, 7, 10],
    [4, 5, 7, 11],
    [2, 5, 7, 10],
    [1, 2, 7, 9],
    [1, 4, 7, 8],
];

#[rustfmt::skip]
pub static TILING12_1_1: [[i8; 12]; 24] = [
    [3, 11, 10, 3, 10, 9, 3, 9, 0, 7, 8, 4],
    [0, 8, 11, 0, 11, 10, 0, 10, 1, 4, 9, 5],
    [0, 9, 5, 0, 5, 7, 0, 7, 3, 2, 10, 1],
    [1, 5, 7, 1, 7, 8, 1, 8, 0, 3, 11, 2],
    [1, 9, 8, 1, 8, 11, 1, 11, 2, 5, 10, 6],
    [1, 9, 4, 1, 4, 7, 1, 7, 3, 5, 10, 6],
    [2, 6, 5, 2, 5, 9, 2, 9, 0, 7, 8, 4],
    [0, 4, 7, 0, 7, 11, 0, 11, 2, 5, 10, 6],
    [3, 11, 6, 3, 6, 5, 3, 5, 1, 7, 8, 4],
    [0, 8, 3, 2, 6, 4, 2, 4, 9, 2, 9, 1],
    [1, 10, 6, 1, 6, 4, 1, 4, 0, 3, 11, 2],
    [3, 11, 2, 7, 8, 9, 7, 9, 10, 7, 10, 6],
    [2, 10, 9, 2, 9, 8, 2, 8, 3, 6, 11, 7],
    [0, 4, 6, 0, 6, 11, 0, 11, 3, 2, 10, 1],
    [1, 9, 0, 3, 8, 4, 3, 4, 6, 3, 6, 2],
    [1, 5, 4, 1, 4, 8, 1, 8, 3, 6, 11, 7],
    [2, 10, 5, 2, 5, 4, 2, 4, 0, 6, 11, 7],
    [0, 8, 7, 0, 7, 6, 0, 6, 2, 4, 9, 5],
    [3, 7, 6, 3, 6, 10, 3, 10, 1, 4, 9, 5],
    [2, 10, 1, 6, 11, 8, 6, 8, 9, 6, 9, 5],
    [0, 8, 3, 2, 11, 7, 2, 7, 5, 2, 5, 1],
    [1, 9, 0, 3, 7, 5, 3, 5, 10, 3, 10, 2],
    [1, 9, 0, 5, 10, 11, 5, 11, 8, 5, 8, 4],
    [0, 8, 3, 4, 9, 10, 4, 10, 11, 4, 11, 7],
];

#[rustfmt::skip]
pub static TILING12_1_1_INV: [[i8; 12]; 24] = [
    [3, 8, 0, 7, 11, 10, 7, 10, 9, 7, 9, 4],
    [0, 9, 1, 4, 8, 11, 4, 11, 10, 4, 10, 5],
    [0, 9, 1, 2, 10, 5, 2, 5, 7, 2, 7, 3],
    [3, 8, 0, 1, 5, 7, 1, 7, 11, 1, 11, 2],
    [1, 10, 2, 5, 9, 8, 5, 8, 11, 5, 11, 6],
    [1, 10, 6, 1, 6, 7, 1, 7, 3, 5, 9, 4],
    [2, 6, 7, 2, 7, 8, 2, 8, 0, 5, 9, 4],
    [0, 4, 5, 0, 5, 10, 0, 10, 2, 7, 11, 6],
    [3, 8, 4, 3, 4, 5, 3, 5, 1, 7, 11, 6],
    [0, 9, 1, 2, 6, 4, 2, 4, 8, 2, 8, 3],
    [3, 11, 6, 3, 6, 4, 3, 4, 0, 1, 10, 2],
    [3, 8, 9, 3, 9, 10, 3, 10, 2, 7, 11, 6],
    [2, 11, 3, 6, 10, 9, 6, 9, 8, 6, 8, 7],
    [0, 4, 6, 0, 6, 10, 0, 10, 1, 2, 11, 3],
    [3, 8, 0, 1, 9, 4, 1, 4, 6, 1, 6, 2],
    [1, 5, 6, 1, 6, 11, 1, 11, 3, 4, 8, 7],
    [2, 11, 7, 2, 7, 4, 2, 4, 0, 6, 10, 5],
    [0, 9, 5, 0, 5, 6, 0, 6, 2, 4, 8, 7],
    [3, 7, 4, 3, 4, 9, 3, 9, 1, 6, 10, 5],
    [2, 11, 8, 2, 8, 9, 2, 9, 1, 6, 10, 5],
    [0, 8, 7, 0, 7, 5, 0, 5, 1, 2, 11, 3],
    [3, 7, 5, 3, 5, 9, 3, 9, 0, 1, 10, 2],
    [1, 10, 11, 1, 11, 8, 1, 8, 0, 5, 9, 4],
    [0, 9, 10, 0, 10, 11, 0, 11, 3, 4, 8, 7],
];

#[rustfmt::skip]
pub static TILING12_1_2: [[i8; 24]; 24] = [
    [3, 11, 8, 11, 7, 8, 11, 10, 7, 10, 9, 7, 9, 4, 7, 9, 0, 4, 0, 8, 4, 0, 3, 8],
    [0, 8, 9, 8, 4, 9, 8, 11, 4, 11, 10, 4, 10, 5, 4, 10, 1, 5, 1, 9, 5, 1, 0, 9],
    [0, 9, 1, 9, 5, 1, 5, 10, 1, 5, 7, 10, 7, 3, 10, 3, 2, 10, 3, 0, 2, 0, 1, 2],
    [1, 5, 2, 5, 7, 2, 7, 11, 2, 7, 8, 11, 8, 3, 11, 8, 0, 3, 0, 1, 3, 1, 2, 3],
    [1, 9, 10, 9, 5, 10, 9, 8, 5, 8, 11, 5, 11, 6, 5, 11, 2, 6, 2, 10, 6, 2, 1, 10],
    [1, 9, 10, 9, 5, 10, 9, 4, 5, 4, 7, 5, 7, 6, 5, 7, 3, 6, 3, 1, 6, 1, 10, 6],
    [2, 6, 8, 6, 7, 8, 6, 5, 7, 5, 4, 7, 5, 9, 4, 9, 0, 4, 0, 8, 4, 0, 2, 8],
    [0, 4, 10, 4, 5, 10, 4, 7, 5, 7, 6, 5, 7, 11, 6, 11, 2, 6, 2, 10, 6, 2, 0, 10],
    [3, 11, 8, 11, 7, 8, 11, 6, 7, 6, 5, 7, 5, 4, 7, 5, 1, 4, 1, 3, 4, 3, 8, 4],
    [0, 9, 1, 0, 8, 9, 8, 4, 9, 8, 3, 4, 3, 0, 4, 0, 6, 4, 0, 2, 6, 0, 1, 2],
    [1, 10, 2, 10, 6, 2, 6, 11, 2, 6, 4, 11, 4, 0, 11, 0, 3, 11, 0, 1, 3, 1, 2, 3],
    [3, 11, 8, 11, 7, 8, 11, 6, 7, 11, 2, 6, 2, 10, 6, 2, 3, 10, 3, 9, 10, 3, 8, 9],
    [2, 10, 11, 10, 6, 11, 10, 9, 6, 9, 8, 6, 8, 7, 6, 8, 3, 7, 3, 11, 7, 3, 2, 11],
    [0, 4, 1, 4, 6, 1, 6, 10, 1, 6, 11, 10, 11, 2, 10, 11, 3, 2, 3, 0, 2, 0, 1, 2],
    [1, 9, 6, 9, 4, 6, 9, 0, 4, 0, 8, 4, 0, 3, 8, 0, 1, 3, 1, 2, 3, 1, 6, 2],
    [1, 5, 11, 5, 6, 11, 5, 4, 6, 4, 7, 6, 4, 8, 7, 8, 3, 7, 3, 11, 7, 3, 1, 11],
    [2, 10, 11, 10, 6, 11, 10, 5, 6, 5, 4, 6, 4, 7, 6, 4, 0, 7, 0, 2, 7, 2, 11, 7],
    [0, 8, 9, 8, 4, 9, 8, 7, 4, 7, 6, 4, 6, 5, 4, 6, 2, 5, 2, 0, 5, 0, 9, 5],
    [3, 7, 9, 7, 4, 9, 7, 6, 4, 6, 5, 4, 6, 10, 5, 10, 1, 5, 1, 9, 5, 1, 3, 9],
    [2, 10, 11, 10, 6, 11, 10, 5, 6, 10, 1, 5, 1, 9, 5, 1, 2, 9, 2, 8, 9, 2, 11, 8],
    [0, 8, 5, 8, 7, 5, 8, 3, 7, 3, 11, 7, 3, 2, 11, 3, 0, 2, 0, 1, 2, 0, 5, 1],
    [1, 10, 2, 1, 9, 10, 9, 5, 10, 9, 0, 5, 0, 1, 5, 1, 7, 5, 1, 3, 7, 1, 2, 3],
    [1, 9, 10, 9, 5, 10, 9, 4, 5, 9, 0, 4, 0, 8, 4, 0, 1, 8, 1, 11, 8, 1, 10, 11],
    [0, 8, 9, 8, 4, 9, 8, 7, 4, 8, 3, 7, 3, 11, 7, 3, 0, 11, 0, 10, 11, 0, 9, 10],
];

#[rustfmt::skip]
pub static TILING12_2: [[i8; 24]; 24] = [
    [12, 3, 11, 12, 11, 10, 12, 10, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3],
    [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 11, 12, 11, 10, 12, 10, 1, 12, 1, 0],
    [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 10, 12, 10, 5, 12, 5, 7, 12, 7, 3, 12, 3, 0],
    [12, 1, 5, 12, 5, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1],
    [12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 8, 12, 8, 11, 12, 11, 2, 12, 2, 1],
    [12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 3, 12, 3, 1],
    [12, 2, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 2],
    [12, 0, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 0],
    [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 1, 12, 1, 3],
    [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 6, 12, 6, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0],
    [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 11, 12, 11, 6, 12, 6, 4, 12, 4, 0, 12, 0, 1],
    [12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 9, 12, 9, 10, 12, 10, 2, 12, 2, 3],
    [12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 9, 12, 9, 8, 12, 8, 3, 12, 3, 2],
    [12, 0, 4, 12, 4, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0],
    [12, 1, 9, 12, 9, 4, 12, 4, 6, 12, 6, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1],
    [12, 1, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 1],
    [12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 0, 12, 0, 2],
    [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 2, 12, 2, 0],
    [12, 3, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 3],
    [12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 8, 12, 8, 9, 12, 9, 1, 12, 1, 2],
    [12, 0, 8, 12, 8, 7, 12, 7, 5, 12, 5, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0],
    [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 7, 12, 7, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1],
    [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 11, 12, 11, 8, 12, 8, 0, 12, 0, 1],
    [12, 0, 9, 12, 9, 10, 12, 10, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0],
];

#[rustfmt::skip]
pub static TILING12_2_INV: [[i8; 24]; 24] = [
    [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 10, 12, 10, 9, 12, 9, 0, 12, 0, 3],
    [12, 0, 8, 12, 8, 11, 12, 11, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0],
    [12, 0, 9, 12, 9, 5, 12, 5, 7, 12, 7, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0],
    [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 5, 12, 5, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3],
    [12, 1, 9, 12, 9, 8, 12, 8, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1],
    [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 3, 12, 3, 1],
    [12, 2, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 2],
    [12, 0, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 0],
    [12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 1, 12, 1, 3],
    [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 6, 12, 6, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0],
    [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 10, 12, 10, 6, 12, 6, 4, 12, 4, 0, 12, 0, 3],
    [12, 3, 8, 12, 8, 9, 12, 9, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3],
    [12, 2, 10, 12, 10, 9, 12, 9, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2],
    [12, 0, 4, 12, 4, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0],
    [12, 3, 8, 12, 8, 4, 12, 4, 6, 12, 6, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3],
    [12, 1, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 1],
    [12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 0, 12, 0, 2],
    [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 2, 12, 2, 0],
    [12, 3, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 3],
    [12, 2, 11, 12, 11, 8, 12, 8, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2],
    [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 11, 12, 11, 7, 12, 7, 5, 12, 5, 1, 12, 1, 0],
    [12, 3, 7, 12, 7, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3],
    [12, 1, 10, 12, 10, 11, 12, 11, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1],
    [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 10, 12, 10, 11, 12, 11, 3, 12, 3, 0],
];

#[rustfmt::skip]
pub static TEST13: [[i8; 7]; 2] = [
    [1, 2, 3, 4, 5, 6, 7],
    [-1, -2, -3, -4, -5, -6, -7],
];

pub static SUBCONFIG13: [i8; 64] = [0, 1, 2, 7, 3, -1, 8, -1, 4, 9, -1, -1, 10, -1, -1, -1, 5, 11, 12, 19, 13, -1, 23, 38, 14, 24, -1, 37, 20, 36, 35, 44, 6, 15, 16, 25, 17, -1, 21, 34, 18, 22, -1, 33, 26, 32, 31, 43, -1, -1, -1, 30, -1, -1, 29, 42, -1, 28, -1, 41, 27, 40, 39, 45];

#[rustfmt::skip]
pub static TILING13_1: [[i8; 12]; 2] = [
    [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6],
    [0, 9, 1, 2, 11, 3, 4, 8, 7, 6, 10, 5],
];

#[rustfmt::skip]
pub static TILING13_1_INV: [[i8; 12]; 2] = [
    [3, 8, 0, 1, 10, 2, 5, 9, 4, 7, 11, 6],
    [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7],
];

#[rustfmt::skip]
pub static TILING13_2: [[[i8; 18]; 6]; 2] = [
    [
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6, 9, 4, 8, 0, 9, 8],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6, 10, 5, 9, 1, 10, 9],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6, 11, 6, 10, 2, 11, 10],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6, 8, 7, 11, 3, 8, 11],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6, 3, 2, 1, 3, 1, 0],
        [1, 9, 0, 3, 11, 2, 7, 8, 4, 5, 10, 6, 5, 6, 7, 4, 5, 7],
    ],
    [
        [0, 8, 7, 0, 7, 4, 0, 4, 9, 0, 9, 1, 2, 11, 3, 6, 10, 5],
        [0, 9, 5, 0, 5, 6, 0, 6, 10, 0, 10, 1, 2, 11, 3, 4, 8, 7],
        [0, 9, 1, 2, 10, 5, 2, 5, 6, 2, 6, 11, 2, 11, 3, 4, 8, 7],
        [0, 9, 1, 2, 11, 7, 2, 7, 4, 2, 4, 8, 2, 8, 3, 6, 10, 5],
        [0, 9, 1, 0, 1, 2, 0, 2, 11, 0, 11, 3, 4, 8, 7, 6, 10, 5],
        [0, 9, 1, 2, 11, 3, 4, 8, 7, 4, 7, 6, 4, 6, 10, 4, 10, 5],
    ],
];

#[rustfmt::skip]
pub static TILING13_2_INV: [[[i8; 18]; 6]; 2] = [
    [
        [3, 8, 4, 3, 4, 5, 3, 5, 9, 3, 9, 0, 1, 10, 2, 7, 11, 6],
        [3, 8, 0, 1, 9, 4, 1, 4, 5, 1, 5, 10, 1, 10, 2, 7, 11, 6],
        [3, 8, 0, 1, 10, 6, 1, 6, 7, 1, 7, 11, 1, 11, 2, 5, 9, 4],
        [3, 11, 6, 3, 6, 7, 3, 7, 8, 3, 8, 0, 1, 10, 2, 5, 9, 4],
        [1, 10, 2, 1, 2, 3, 1, 3, 8, 1, 8, 0, 5, 9, 4, 7, 11, 6],
        [3, 8, 0, 1, 10, 2, 7, 11, 6, 7, 6, 5, 7, 5, 9, 7, 9, 4],
    ],
    [
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7, 9, 4, 8, 0, 9, 8],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7, 10, 5, 9, 1, 10, 9],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7, 11, 6, 10, 2, 11, 10],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7, 8, 7, 11, 3, 8, 11],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7, 3, 2, 1, 3, 1, 0],
        [0, 8, 3, 2, 10, 1, 4, 9, 5, 6, 11, 7, 5, 6, 7, 4, 5, 7],
    ],
];

#[rustfmt::skip]
pub static TILING13_3: [[[i8; 30]; 12]; 2] = [
    [
        [12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 1, 3, 11, 2],
        [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 11, 12, 11, 6, 12, 6, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1, 7, 8, 4],
        [12, 1, 9, 12, 9, 4, 12, 4, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1, 5, 10, 6],
        [1, 9, 0, 12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 3],
        [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3, 5, 10, 6],
        [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 0, 12, 0, 3, 7, 8, 4],
        [12, 3, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3, 7, 8, 4],
        [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3, 5, 10, 6],
        [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 8, 12, 8, 0, 12, 0, 1, 3, 11, 2],
        [12, 1, 10, 12, 10, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1, 3, 11, 2],
        [1, 9, 0, 12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 10, 12, 10, 2, 12, 2, 3],
        [1, 9, 0, 12, 3, 8, 12, 8, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3],
    ],
    [
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 0, 2, 11, 3],
        [12, 0, 9, 12, 9, 5, 12, 5, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0, 4, 8, 7],
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 11, 12, 11, 7, 12, 7, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0, 6, 10, 5],
        [0, 9, 1, 12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 2],
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0, 6, 10, 5],
        [12, 0, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0, 4, 8, 7],
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 3, 12, 3, 0, 4, 8, 7],
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0, 6, 10, 5],
        [12, 0, 8, 12, 8, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0, 2, 11, 3],
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 10, 12, 10, 1, 12, 1, 0, 2, 11, 3],
        [0, 9, 1, 12, 2, 10, 12, 10, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2],
        [0, 9, 1, 12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 8, 12, 8, 3, 12, 3, 2],
    ],
];

#[rustfmt::skip]
pub static TILING13_3_INV: [[[i8; 30]; 12]; 2] = [
    [
        [12, 3, 8, 12, 8, 4, 12, 4, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1, 12, 1, 9, 12, 9, 0, 12, 0, 3, 7, 11, 6],
        [3, 8, 0, 12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 1],
        [12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 3, 1, 10, 2],
        [12, 3, 11, 12, 11, 2, 12, 2, 1, 12, 1, 10, 12, 10, 6, 12, 6, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3, 5, 9, 4],
        [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 8, 12, 8, 4, 12, 4, 5, 12, 5, 9, 12, 9, 0, 12, 0, 1, 7, 11, 6],
        [12, 1, 9, 12, 9, 4, 12, 4, 5, 12, 5, 10, 12, 10, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1, 7, 11, 6],
        [12, 1, 10, 12, 10, 6, 12, 6, 7, 12, 7, 11, 12, 11, 2, 12, 2, 3, 12, 3, 8, 12, 8, 0, 12, 0, 1, 5, 9, 4],
        [12, 1, 10, 12, 10, 2, 12, 2, 3, 12, 3, 11, 12, 11, 6, 12, 6, 7, 12, 7, 8, 12, 8, 0, 12, 0, 1, 5, 9, 4],
        [12, 3, 8, 12, 8, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 9, 12, 9, 0, 12, 0, 3, 1, 10, 2],
        [3, 8, 0, 12, 1, 9, 12, 9, 4, 12, 4, 7, 12, 7, 11, 12, 11, 6, 12, 6, 5, 12, 5, 10, 12, 10, 2, 12, 2, 1],
        [3, 8, 0, 12, 1, 10, 12, 10, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 11, 12, 11, 2, 12, 2, 1],
        [12, 3, 11, 12, 11, 6, 12, 6, 5, 12, 5, 9, 12, 9, 4, 12, 4, 7, 12, 7, 8, 12, 8, 0, 12, 0, 3, 1, 10, 2],
    ],
    [
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 10, 12, 10, 5, 12, 5, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0, 6, 11, 7],
        [0, 8, 3, 12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 2],
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 0, 2, 10, 1],
        [12, 0, 8, 12, 8, 7, 12, 7, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0, 4, 9, 5],
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0, 6, 11, 7],
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0, 6, 11, 7],
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 1, 12, 1, 0, 4, 9, 5],
        [12, 0, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0, 4, 9, 5],
        [12, 0, 9, 12, 9, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0, 2, 10, 1],
        [0, 8, 3, 12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 9, 12, 9, 1, 12, 1, 2],
        [0, 8, 3, 12, 2, 11, 12, 11, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2],
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 11, 12, 11, 3, 12, 3, 0, 2, 10, 1],
    ],
];

#[rustfmt::skip]
pub static TILING13_4: [[[i8; 36]; 4]; 2] = [
    [
        [8, 0, 12, 7, 8, 12, 4, 7, 12, 9, 4, 12, 5, 9, 12, 6, 5, 12, 10, 6, 12, 1, 10, 12, 2, 1, 12, 11, 2, 12, 3, 11, 12, 0, 3, 12],
        [9, 0, 12, 1, 9, 12, 2, 1, 12, 10, 2, 12, 5, 10, 12, 6, 5, 12, 11, 6, 12, 7, 11, 12, 4, 7, 12, 8, 4, 12, 3, 8, 12, 0, 3, 12],
        [9, 0, 12, 5, 9, 12, 4, 5, 12, 8, 4, 12, 7, 8, 12, 6, 7, 12, 11, 6, 12, 3, 11, 12, 2, 3, 12, 10, 2, 12, 1, 10, 12, 0, 1, 12],
        [8, 0, 12, 3, 8, 12, 2, 3, 12, 11, 2, 12, 7, 11, 12, 6, 7, 12, 10, 6, 12, 5, 10, 12, 4, 5, 12, 9, 4, 12, 1, 9, 12, 0, 1, 12],
    ],
    [
        [12, 0, 8, 12, 8, 7, 12, 7, 4, 12, 4, 9, 12, 9, 5, 12, 5, 6, 12, 6, 10, 12, 10, 1, 12, 1, 2, 12, 2, 11, 12, 11, 3, 12, 3, 0],
        [12, 0, 9, 12, 9, 1, 12, 1, 2, 12, 2, 10, 12, 10, 5, 12, 5, 6, 12, 6, 11, 12, 11, 7, 12, 7, 4, 12, 4, 8, 12, 8, 3, 12, 3, 0],
        [12, 0, 9, 12, 9, 5, 12, 5, 4, 12, 4, 8, 12, 8, 7, 12, 7, 6, 12, 6, 11, 12, 11, 3, 12, 3, 2, 12, 2, 10, 12, 10, 1, 12, 1, 0],
        [12, 0, 8, 12, 8, 3, 12, 3, 2, 12, 2, 11, 12, 11, 7, 12, 7, 6, 12, 6, 10, 12, 10, 5, 12, 5, 4, 12, 4, 9, 12, 9, 1, 12, 1, 0],
    ],
];

#[rustfmt::skip]
pub static TILING13_5_1: [[[i8; 18]; 4]; 2] = [
    [
        [3, 11, 6, 3, 6, 5, 3, 5, 9, 3, 9, 0, 1, 10, 2, 7, 8, 4],
        [3, 8, 0, 1, 9, 4, 1, 4, 7, 1, 7, 11, 1, 11, 2, 5, 10, 6],
        [1, 10, 6, 1, 6, 7, 1, 7, 8, 1, 8, 0, 3, 11, 2, 5, 9, 4],
        [1, 9, 0, 3, 8, 4, 3, 4, 5, 3, 5, 10, 3, 10, 2, 7, 11, 6],
    ],
    [
        [0, 9, 5, 0, 5, 6, 0, 6, 11, 0, 11, 3, 2, 10, 1, 4, 8, 7],
        [0, 8, 3, 2, 11, 7, 2, 7, 4, 2, 4, 9, 2, 9, 1, 6, 10, 5],
        [0, 8, 7, 0, 7, 6, 0, 6, 10, 0, 10, 1, 2, 11, 3, 4, 9, 5],
        [0, 9, 1, 2, 10, 5, 2, 5, 4, 2, 4, 8, 2, 8, 3, 6, 11, 7],
    ],
];

#[rustfmt::skip]
pub static TILING13_5_2: [[[i8; 30]; 4]; 2] = [
    [
        [3, 11, 8, 11, 7, 8, 11, 6, 7, 6, 5, 7, 5, 4, 7, 5, 9, 4, 9, 0, 4, 0, 8, 4, 0, 3, 8, 1, 10, 2],
        [1, 9, 10, 9, 5, 10, 9, 4, 5, 4, 7, 5, 7, 6, 5, 7, 11, 6, 11, 2, 6, 2, 10, 6, 2, 1, 10, 3, 8, 0],
        [1, 10, 2, 10, 6, 2, 6, 11, 2, 6, 7, 11, 7, 8, 11, 8, 3, 11, 8, 0, 3, 0, 1, 3, 1, 2, 3, 5, 9, 4],
        [1, 10, 2, 1, 9, 10, 9, 5, 10, 9, 4, 5, 9, 0, 4, 0, 8, 4, 0, 3, 8, 0, 1, 3, 1, 2, 3, 7, 11, 6],
    ],
    [
        [0, 9, 1, 9, 5, 1, 5, 10, 1, 5, 6, 10, 6, 11, 10, 11, 2, 10, 11, 3, 2, 3, 0, 2, 0, 1, 2, 4, 8, 7],
        [0, 9, 1, 0, 8, 9, 8, 4, 9, 8, 7, 4, 8, 3, 7, 3, 11, 7, 3, 2, 11, 3, 0, 2, 0, 1, 2, 6, 10, 5],
        [0, 8, 9, 8, 4, 9, 8, 7, 4, 7, 6, 4, 6, 5, 4, 6, 10, 5, 10, 1, 5, 1, 9, 5, 1, 0, 9, 2, 11, 3],
        [2, 10, 11, 10, 6, 11, 10, 5, 6, 5, 4, 6, 4, 7, 6, 4, 8, 7, 8, 3, 7, 3, 11, 7, 3, 2, 11, 0, 9, 1],
    ],
];

#[rustfmt::skip]
pub static TILING14: [[i8; 12]; 12] = [
    [0, 4, 7, 0, 7, 11, 0, 11, 10, 0, 10, 1],
    [1, 5, 4, 1, 4, 8, 1, 8, 11, 1, 11, 2],
    [2, 10, 5, 2, 5, 7, 2, 7, 8, 2, 8, 0],
    [2, 6, 5, 2, 5, 9, 2, 9, 8, 2, 8, 3],
    [3, 11, 6, 3, 6, 4, 3, 4, 9, 3, 9, 1],
    [0, 9, 10, 0, 10, 6, 0, 6, 7, 0, 7, 3],
    [3, 7, 6, 3, 6, 10, 3, 10, 9, 3, 9, 0],
    [1, 9, 4, 1, 4, 6, 1, 6, 11, 1, 11, 3],
    [3, 8, 9, 3, 9, 5, 3, 5, 6, 3, 6, 2],
    [0, 8, 7, 0, 7, 5, 0, 5, 10, 0, 10, 2],
    [2, 11, 8, 2, 8, 4, 2, 4, 5, 2, 5, 1],
    [1, 10, 11, 1, 11, 7, 1, 7, 4, 1, 4, 0],
];
