pub mod beam;
pub mod earth;
pub mod frame;
pub mod principal;

pub use beam::{beam2inst, calc_beam_rotmatrix, inst2beam};
pub use earth::{calc_orientmat, declination_matrix, inst2earth, inst2earth_euler};
pub use frame::{rotate2, set_declination};
pub use principal::{calc_principal_angle, earth2principal};
