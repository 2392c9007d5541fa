//! Case tables for each BLAS routine.
//!
//! Every table is an explicit cross product of the layout perturbations, precisions,
//! output handling modes and coefficients a routine must be checked under.

use std::fmt;

use gpuarray::tensor::{DType, MemoryOrder};

const BOOLS: [bool; 2] = [false, true];
const STEPS: [isize; 4] = [1, 2, -1, -2];
const COEFFICIENTS: [f64; 4] = [0.0, 1.0, -1.0, 0.6];
const ORDERS: [MemoryOrder; 2] = [MemoryOrder::F, MemoryOrder::C];

fn flag(value: bool, name: &str) -> &str {
    if value {
        name
    } else {
        "-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DotCase {
    pub n: usize,
    pub dtype: DType,
    pub offseted: bool,
    pub sliced: bool,
    pub overwrite: bool,
    pub init_z: bool,
}

impl DotCase {
    /// Step applied to both vectors.
    pub fn step(&self) -> isize {
        if self.sliced {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for DotCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dot(n={}, {}, {}, {}, {}, {})",
            self.n,
            self.dtype,
            flag(self.offseted, "offseted"),
            flag(self.sliced, "sliced"),
            flag(self.overwrite, "overwrite"),
            flag(self.init_z, "init_z"),
        )
    }
}

pub fn dot_cases() -> Vec<DotCase> {
    let mut cases = Vec::new();
    for n in [1, 256, 1337] {
        for dtype in [DType::F32, DType::F64] {
            for offseted in BOOLS {
                for sliced in BOOLS {
                    cases.push(DotCase {
                        n,
                        dtype,
                        offseted,
                        sliced,
                        overwrite: true,
                        init_z: false,
                    });
                }
            }
        }
    }
    for overwrite in BOOLS {
        for init_z in BOOLS {
            cases.push(DotCase {
                n: 666,
                dtype: DType::F32,
                offseted: false,
                sliced: false,
                overwrite,
                init_z,
            });
        }
    }
    cases
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemvCase {
    /// Stored shape of `A`.
    pub shape: (usize, usize),
    pub dtype: DType,
    pub order: MemoryOrder,
    pub trans: bool,
    pub offseted: bool,
    pub sliced: isize,
    pub overwrite: bool,
    pub init_y: bool,
    pub alpha: f64,
    pub beta: f64,
}

impl GemvCase {
    fn basic(shape: (usize, usize), dtype: DType) -> Self {
        GemvCase {
            shape,
            dtype,
            order: MemoryOrder::F,
            trans: false,
            offseted: false,
            sliced: 1,
            overwrite: true,
            init_y: false,
            alpha: 1.0,
            beta: 0.0,
        }
    }

    /// Lengths of `X` and `Y`.
    pub fn vector_lens(&self) -> (usize, usize) {
        let (rows, cols) = self.shape;
        if self.trans {
            (rows, cols)
        } else {
            (cols, rows)
        }
    }
}

impl fmt::Display for GemvCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gemv({}x{}, {}, order={}, {}, {}, step={}, {}, {}, alpha={}, beta={})",
            self.shape.0,
            self.shape.1,
            self.dtype,
            self.order,
            flag(self.trans, "trans"),
            flag(self.offseted, "offseted"),
            self.sliced,
            flag(self.overwrite, "overwrite"),
            flag(self.init_y, "init_y"),
            self.alpha,
            self.beta,
        )
    }
}

pub fn gemv_cases() -> Vec<GemvCase> {
    let mut cases = Vec::new();
    for shape in [(100, 128), (128, 50)] {
        for order in ORDERS {
            for trans in BOOLS {
                for offseted in BOOLS {
                    for sliced in STEPS {
                        cases.push(GemvCase {
                            order,
                            trans,
                            offseted,
                            sliced,
                            ..GemvCase::basic(shape, DType::F32)
                        });
                    }
                }
            }
        }
    }
    for overwrite in BOOLS {
        for init_y in BOOLS {
            cases.push(GemvCase {
                overwrite,
                init_y,
                ..GemvCase::basic((4, 3), DType::F32)
            });
        }
    }
    cases.push(GemvCase::basic((32, 32), DType::F64));
    cases.extend(gemv_coefficient_cases());
    cases
}

/// Coefficient grid on a supplied `Y`, including `alpha = 0` and `beta = 0`.
pub fn gemv_coefficient_cases() -> Vec<GemvCase> {
    let mut cases = Vec::new();
    for alpha in COEFFICIENTS {
        for beta in COEFFICIENTS {
            for overwrite in BOOLS {
                cases.push(GemvCase {
                    overwrite,
                    init_y: true,
                    alpha,
                    beta,
                    ..GemvCase::basic((32, 32), DType::F32)
                });
            }
        }
    }
    cases
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmCase {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub dtype: DType,
    /// Storage orders of `A`, `B` and `C`.
    pub orders: [MemoryOrder; 3],
    pub trans_a: bool,
    pub trans_b: bool,
    pub offseted_outer: bool,
    pub sliced: isize,
    pub overwrite: bool,
    pub init_c: bool,
    pub alpha: f64,
    pub beta: f64,
}

impl GemmCase {
    fn basic(m: usize, n: usize, k: usize, dtype: DType) -> Self {
        GemmCase {
            m,
            n,
            k,
            dtype,
            orders: [MemoryOrder::F; 3],
            trans_a: false,
            trans_b: false,
            offseted_outer: false,
            sliced: 1,
            overwrite: false,
            init_c: false,
            alpha: 1.0,
            beta: 0.0,
        }
    }

    /// Stored shapes of `A` and `B`.
    pub fn input_dims(&self) -> ([usize; 2], [usize; 2]) {
        let a = if self.trans_a {
            [self.k, self.m]
        } else {
            [self.m, self.k]
        };
        let b = if self.trans_b {
            [self.n, self.k]
        } else {
            [self.k, self.n]
        };
        (a, b)
    }
}

impl fmt::Display for GemmCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gemm(m={}, n={}, k={}, {}, orders={}{}{}, {}, {}, {}, step={}, {}, {}, alpha={}, beta={})",
            self.m,
            self.n,
            self.k,
            self.dtype,
            self.orders[0],
            self.orders[1],
            self.orders[2],
            flag(self.trans_a, "trans_a"),
            flag(self.trans_b, "trans_b"),
            flag(self.offseted_outer, "offseted"),
            self.sliced,
            flag(self.overwrite, "overwrite"),
            flag(self.init_c, "init_c"),
            self.alpha,
            self.beta,
        )
    }
}

fn order_triples(c_orders: &[MemoryOrder]) -> Vec<[MemoryOrder; 3]> {
    let mut triples = Vec::new();
    for a in ORDERS {
        for b in ORDERS {
            for &c in c_orders {
                triples.push([a, b, c]);
            }
        }
    }
    triples
}

pub fn gemm_cases() -> Vec<GemmCase> {
    let mut cases = Vec::new();
    for (m, n, k) in [(48, 15, 32), (15, 32, 48)] {
        for orders in order_triples(&ORDERS) {
            for trans_a in BOOLS {
                for trans_b in BOOLS {
                    for offseted_outer in BOOLS {
                        cases.push(GemmCase {
                            orders,
                            trans_a,
                            trans_b,
                            offseted_outer,
                            ..GemmCase::basic(m, n, k, DType::F32)
                        });
                    }
                }
            }
        }
    }
    for sliced in STEPS {
        for overwrite in BOOLS {
            for init_c in BOOLS {
                cases.push(GemmCase {
                    sliced,
                    overwrite,
                    init_c,
                    ..GemmCase::basic(4, 3, 2, DType::F32)
                });
            }
        }
    }
    cases.push(GemmCase::basic(32, 32, 32, DType::F64));
    cases.extend(gemm_coefficient_cases());
    cases
}

pub fn gemm_coefficient_cases() -> Vec<GemmCase> {
    let mut cases = Vec::new();
    for alpha in COEFFICIENTS {
        for beta in COEFFICIENTS {
            for overwrite in BOOLS {
                cases.push(GemmCase {
                    overwrite,
                    init_c: true,
                    alpha,
                    beta,
                    ..GemmCase::basic(32, 23, 32, DType::F32)
                });
            }
        }
    }
    cases
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GerCase {
    pub m: usize,
    pub n: usize,
    pub dtype: DType,
    pub order: MemoryOrder,
    pub sliced_x: isize,
    pub sliced_y: isize,
    pub init_a: bool,
    pub overwrite: bool,
}

impl GerCase {
    fn basic(dtype: DType) -> Self {
        GerCase {
            m: 4,
            n: 5,
            dtype,
            order: MemoryOrder::F,
            sliced_x: 1,
            sliced_y: 1,
            init_a: false,
            overwrite: false,
        }
    }
}

impl fmt::Display for GerCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ger(m={}, n={}, {}, order={}, step_x={}, step_y={}, {}, {})",
            self.m,
            self.n,
            self.dtype,
            self.order,
            self.sliced_x,
            self.sliced_y,
            flag(self.init_a, "init_a"),
            flag(self.overwrite, "overwrite"),
        )
    }
}

pub fn ger_cases() -> Vec<GerCase> {
    let steps = [1, 2, -2, -1];
    let mut cases = Vec::new();
    for order in ORDERS {
        for sliced_x in steps {
            for sliced_y in steps {
                cases.push(GerCase {
                    order,
                    sliced_x,
                    sliced_y,
                    ..GerCase::basic(DType::F32)
                });
            }
        }
    }
    cases.push(GerCase::basic(DType::F64));
    for init_a in BOOLS {
        for overwrite in BOOLS {
            cases.push(GerCase {
                init_a,
                overwrite,
                ..GerCase::basic(DType::F32)
            });
        }
    }
    cases
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchedGemmCase {
    pub batch: usize,
    pub gemm: GemmCase,
}

impl BatchedGemmCase {
    fn basic(batch: usize, m: usize, n: usize, k: usize, dtype: DType) -> Self {
        BatchedGemmCase {
            batch,
            gemm: GemmCase {
                orders: [MemoryOrder::F, MemoryOrder::F, MemoryOrder::C],
                ..GemmCase::basic(m, n, k, dtype)
            },
        }
    }

    /// Stored shapes of the stacked `A` and `B`.
    pub fn input_dims(&self) -> ([usize; 3], [usize; 3]) {
        let (a, b) = self.gemm.input_dims();
        ([self.batch, a[0], a[1]], [self.batch, b[0], b[1]])
    }
}

impl fmt::Display for BatchedGemmCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch={} {}", self.batch, self.gemm)
    }
}

pub fn batched_gemm_cases() -> Vec<BatchedGemmCase> {
    let mut cases = Vec::new();
    for batch in [1, 17, 31] {
        for (m, n, k) in [(24, 7, 16), (7, 16, 24)] {
            for orders in order_triples(&[MemoryOrder::C]) {
                for trans_a in BOOLS {
                    for trans_b in BOOLS {
                        for offseted_outer in BOOLS {
                            let mut case = BatchedGemmCase::basic(batch, m, n, k, DType::F32);
                            case.gemm.orders = orders;
                            case.gemm.trans_a = trans_a;
                            case.gemm.trans_b = trans_b;
                            case.gemm.offseted_outer = offseted_outer;
                            cases.push(case);
                        }
                    }
                }
            }
        }
    }
    for sliced in STEPS {
        for overwrite in BOOLS {
            for init_c in BOOLS {
                let mut case = BatchedGemmCase::basic(5, 4, 3, 2, DType::F32);
                case.gemm.sliced = sliced;
                case.gemm.overwrite = overwrite;
                case.gemm.init_c = init_c;
                cases.push(case);
            }
        }
    }
    cases.push(BatchedGemmCase::basic(16, 16, 16, 16, DType::F64));
    cases.extend(batched_gemm_coefficient_cases());
    cases
}

pub fn batched_gemm_coefficient_cases() -> Vec<BatchedGemmCase> {
    let mut cases = Vec::new();
    for alpha in COEFFICIENTS {
        for beta in COEFFICIENTS {
            for overwrite in BOOLS {
                let mut case = BatchedGemmCase::basic(16, 16, 9, 16, DType::F32);
                case.gemm.overwrite = overwrite;
                case.gemm.init_c = true;
                case.gemm.alpha = alpha;
                case.gemm.beta = beta;
                cases.push(case);
            }
        }
    }
    cases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_have_expected_sizes() {
        assert_eq!(dot_cases().len(), 3 * 2 * 2 * 2 + 4);
        assert_eq!(gemv_cases().len(), 2 * 2 * 2 * 2 * 4 + 4 + 1 + 32);
        assert_eq!(gemm_cases().len(), 2 * 8 * 4 * 2 + 16 + 1 + 32);
        assert_eq!(ger_cases().len(), 2 * 16 + 1 + 4);
        assert_eq!(batched_gemm_cases().len(), 3 * 2 * 4 * 4 * 2 + 16 + 1 + 32);
    }

    #[test]
    fn tables_cover_both_precisions_and_all_batch_sizes() {
        assert!(dot_cases().iter().any(|case| case.dtype == DType::F64));
        let batches: Vec<usize> = batched_gemm_cases().iter().map(|case| case.batch).collect();
        for batch in [1, 5, 16, 17, 31] {
            assert!(batches.contains(&batch), "batch {batch}");
        }
    }

    #[test]
    fn input_shapes_follow_transpose_flags() {
        let case = GemmCase {
            trans_a: true,
            trans_b: true,
            ..GemmCase::basic(48, 15, 32, DType::F32)
        };
        assert_eq!(case.input_dims(), ([32, 48], [15, 32]));
        let gemv = GemvCase {
            trans: true,
            ..GemvCase::basic((100, 128), DType::F32)
        };
        assert_eq!(gemv.vector_lens(), (100, 128));
    }

    #[test]
    fn labels_name_the_parameters() {
        let label = dot_cases()[0].to_string();
        assert_eq!(label, "dot(n=1, float32, -, -, overwrite, -)");
    }
}
