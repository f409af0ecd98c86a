use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::unknowns::UnknownQuantity;

/// Write data to CSV file with headers
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = File::create(path)?;

    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);

    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| {
                if i < col.len() {
                    format!("{:.15e}", col[i])
                } else {
                    String::new()
                }
            })
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }

    Ok(())
}

/// Write x-y data pairs
pub fn write_xy<P: AsRef<Path>>(
    path: P,
    x_header: &str,
    y_header: &str,
    x_data: &[f64],
    y_data: &[f64],
) -> io::Result<()> {
    if x_data.len() != y_data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "X and Y data lengths don't match ({} vs {})",
                x_data.len(),
                y_data.len()
            ),
        ));
    }
    write_csv(
        path,
        &[x_header, y_header],
        &[x_data.to_vec(), y_data.to_vec()],
    )
}

/// Writes the saved history of an unknown: one row per snapshot, a `t`
/// column followed by the flattened values. The first line is a comment
/// carrying the name and the output shape.
pub fn write_history<P: AsRef<Path>>(path: P, quantity: &UnknownQuantity) -> io::Result<()> {
    let times = quantity.data.history_times();
    let snapshots = quantity.data.history();
    let dims: Vec<String> = quantity.data.history_dims().iter().map(usize::to_string).collect();

    let mut file = File::create(path)?;
    writeln!(file, "# {}: {} [{}]", quantity.name, quantity.description, dims.join(", "))?;

    let mut headers = vec!["t".to_string()];
    headers.extend((0..quantity.data.size()).map(|k| format!("{}_{k}", quantity.name)));
    writeln!(file, "{}", headers.join(","))?;

    for (t, values) in times.iter().zip(snapshots) {
        let row: Vec<String> = std::iter::once(t)
            .chain(values.iter())
            .map(|v| format!("{v:.15e}"))
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::discretization::generator::cartesian_grid;
    use crate::unknowns::{FluxGridType, UnknownQuantityHandler};

    #[test]
    fn test_write_csv() {
        let path = "test_output.csv";
        let headers = &["x", "y", "z"];
        let data = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ];

        write_csv(path, headers, &data).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("x,y,z"));

        fs::remove_file(path).ok();
    }

    #[test]
    fn history_has_one_row_per_snapshot() {
        let grid = cartesian_grid(2, 1, 1).unwrap();
        let mut unknowns = UnknownQuantityHandler::new();
        let id = unknowns.insert("n", "density", &grid, 1, FluxGridType::Distribution).unwrap();
        unknowns.set_initial_value(id, Some(&[1.0, 2.0]), 0.0).unwrap();
        unknowns.store(id, &[3.0, 4.0], 0, false).unwrap();
        unknowns.save_step(0.5, true);

        let path = std::env::temp_dir().join("plasma_fvm_history_test.csv");
        write_history(&path, unknowns.get(id).unwrap()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "# n: density [2, 2]");
        assert_eq!(lines[1], "t,n_0,n_1");
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("5.000000000000000e-1,3.0"));

        fs::remove_file(path).ok();
    }
}
