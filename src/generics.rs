//!这个是给程序提供泛型支持的模块
use num_complex::{Complex, Complex64};

//这里的trait是为了让 hopping 的输入可以同时满足 f64 和 Complex64
#[allow(non_camel_case_types)]
pub trait hop_use: Copy {
    fn to_complex(&self) -> Complex64;
}

impl hop_use for f64 {
    fn to_complex(&self) -> Complex64 {
        Complex64::new(*self, 0.0)
    }
}

impl hop_use for f32 {
    fn to_complex(&self) -> Complex64 {
        Complex64::new(*self as f64, 0.0)
    }
}

impl hop_use for Complex64 {
    fn to_complex(&self) -> Complex64 {
        *self
    }
}

impl hop_use for Complex<f32> {
    fn to_complex(&self) -> Complex64 {
        Complex64::new(self.re as f64, self.im as f64)
    }
}
