pub mod asistencia;
