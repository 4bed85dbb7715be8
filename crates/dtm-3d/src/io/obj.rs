use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::mesh::TriangleMesh;

/// Error types for the OBJ module.
#[derive(Debug, thiserror::Error)]
pub enum ObjError {
    /// Failed to read or write the OBJ file
    #[error("Failed to read or write OBJ file")]
    Io(#[from] std::io::Error),

    /// Malformed OBJ statement
    #[error("Malformed OBJ statement at line {line}: {message}")]
    Parse {
        /// The 1-based line number.
        line: usize,
        /// What is wrong with the statement.
        message: String,
    },

    /// Face referencing a missing vertex
    #[error("Face at line {line} references missing element {index}")]
    InvalidIndex {
        /// The 1-based line number.
        line: usize,
        /// The index as written in the file.
        index: i64,
    },
}

/// Write a triangle mesh to a Wavefront OBJ file.
///
/// Vertices are written as `v x y z` or `v x y z r g b` when the mesh has
/// vertex colors, normals as `vn x y z` and faces with 1-based indices as
/// `f a//a b//b c//c`, or `f a b c` without normals. An existing file is
/// overwritten.
///
/// # Arguments
///
/// * `path` - The path to the OBJ file.
/// * `mesh` - The mesh to write.
pub fn write_obj(path: impl AsRef<Path>, mesh: &TriangleMesh) -> Result<(), ObjError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    writeln!(
        writer,
        "# {} vertices, {} triangles",
        mesh.num_vertices(),
        mesh.num_triangles()
    )?;

    let colors = mesh.has_vertex_colors().then(|| mesh.vertex_colors());
    for (i, v) in mesh.vertices().iter().enumerate() {
        match colors {
            Some(colors) => {
                let c = colors[i];
                writeln!(
                    writer,
                    "v {} {} {} {} {} {}",
                    v[0], v[1], v[2], c[0], c[1], c[2]
                )?
            }
            None => writeln!(writer, "v {} {} {}", v[0], v[1], v[2])?,
        }
    }

    let with_normals = mesh.has_vertex_normals();
    if with_normals {
        for n in mesh.vertex_normals() {
            writeln!(writer, "vn {} {} {}", n[0], n[1], n[2])?;
        }
    }

    for t in mesh.triangles() {
        let [a, b, c] = t.map(|i| i + 1);
        if with_normals {
            writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
        } else {
            writeln!(writer, "f {a} {b} {c}")?;
        }
    }

    writer.flush()?;

    log::debug!(
        "Wrote OBJ with {} vertices and {} triangles to {}",
        mesh.num_vertices(),
        mesh.num_triangles(),
        path.as_ref().display()
    );

    Ok(())
}

/// Read a triangle mesh from a Wavefront OBJ file.
///
/// Supports `v` with optional colors, `vn` and `f` statements with the
/// `v`, `v/vt`, `v//vn` and `v/vt/vn` forms, including negative indices.
/// Polygons are triangulated as fans. Other statements are ignored.
///
/// # Arguments
///
/// * `path` - The path to the OBJ file.
///
/// # Returns
///
/// The mesh. Vertex colors are kept only if every vertex has one, a vertex
/// normal is taken from the first face corner referencing the vertex.
pub fn read_obj(path: impl AsRef<Path>) -> Result<TriangleMesh, ObjError> {
    let file = File::open(path.as_ref())?;
    let reader = BufReader::new(file);

    let mut vertices = Vec::new();
    let mut colors = Vec::new();
    let mut normals = Vec::new();
    // (line, [(vertex, normal); n]) resolved once every element is known
    let mut faces: Vec<(usize, Vec<(i64, Option<i64>)>)> = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = line_idx + 1;
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("v") => {
                let values = parse_floats(tokens, line_no)?;
                match values.len() {
                    3 => vertices.push([values[0], values[1], values[2]]),
                    6 => {
                        vertices.push([values[0], values[1], values[2]]);
                        colors.push([values[3], values[4], values[5]]);
                    }
                    n => {
                        return Err(ObjError::Parse {
                            line: line_no,
                            message: format!("expected 3 or 6 vertex values, got {n}"),
                        })
                    }
                }
            }
            Some("vn") => {
                let values = parse_floats(tokens, line_no)?;
                if values.len() != 3 {
                    return Err(ObjError::Parse {
                        line: line_no,
                        message: format!("expected 3 normal values, got {}", values.len()),
                    });
                }
                normals.push([values[0], values[1], values[2]]);
            }
            Some("f") => {
                let corners = tokens
                    .map(|token| parse_face_corner(token, line_no))
                    .collect::<Result<Vec<_>, _>>()?;
                if corners.len() < 3 {
                    return Err(ObjError::Parse {
                        line: line_no,
                        message: "a face needs at least 3 vertices".to_string(),
                    });
                }
                faces.push((line_no, corners));
            }
            _ => {}
        }
    }

    let mut triangles = Vec::with_capacity(faces.len());
    let mut vertex_normals = vec![None; vertices.len()];

    for (line_no, corners) in faces {
        let mut resolved = Vec::with_capacity(corners.len());
        for (v, n) in corners {
            let vi = resolve_index(v, vertices.len(), line_no)?;
            if let Some(n) = n {
                let ni = resolve_index(n, normals.len(), line_no)?;
                vertex_normals[vi].get_or_insert(normals[ni]);
            }
            resolved.push(vi);
        }
        for k in 1..resolved.len() - 1 {
            triangles.push([resolved[0], resolved[k], resolved[k + 1]]);
        }
    }

    let vertex_normals = if !vertex_normals.is_empty() && vertex_normals.iter().all(Option::is_some)
    {
        vertex_normals.into_iter().flatten().collect()
    } else {
        Vec::new()
    };

    if colors.len() != vertices.len() {
        colors.clear();
    }

    Ok(TriangleMesh::new(vertices, triangles)
        .with_vertex_normals(vertex_normals)
        .with_vertex_colors(colors))
}

fn parse_floats<'a>(
    tokens: impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<Vec<f64>, ObjError> {
    tokens
        .map(|t| {
            t.parse::<f64>().map_err(|e| ObjError::Parse {
                line,
                message: format!("invalid number {t:?}: {e}"),
            })
        })
        .collect()
}

// `v`, `v/vt`, `v//vn` or `v/vt/vn`
fn parse_face_corner(token: &str, line: usize) -> Result<(i64, Option<i64>), ObjError> {
    let parse = |s: &str| {
        s.parse::<i64>().map_err(|e| ObjError::Parse {
            line,
            message: format!("invalid index {s:?}: {e}"),
        })
    };

    let mut parts = token.split('/');
    let vertex = parse(parts.next().unwrap_or_default())?;
    let _texture = parts.next();
    let normal = match parts.next() {
        Some(s) if !s.is_empty() => Some(parse(s)?),
        _ => None,
    };

    Ok((vertex, normal))
}

// 1-based, negative indices count from the end
fn resolve_index(index: i64, len: usize, line: usize) -> Result<usize, ObjError> {
    let resolved = match index {
        i if i > 0 => i - 1,
        i if i < 0 => len as i64 + i,
        _ => -1,
    };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ObjError::InvalidIndex { line, index });
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colored_quad() -> TriangleMesh {
        let mut mesh = TriangleMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.5, 0.0, 0.0],
                [1.5, 1.0, 0.25],
                [0.0, 1.0, -0.125],
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .with_vertex_colors(vec![[0.5; 3], [0.1, 0.2, 0.3], [1.0; 3], [0.0; 3]]);
        mesh.compute_vertex_normals();
        mesh
    }

    #[test]
    fn test_write_read_obj() -> Result<(), ObjError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("quad.obj");

        let mesh = colored_quad();
        write_obj(&path, &mesh)?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("v 1.5 0 0 0.1 0.2 0.3"));
        assert!(text.contains("f 1//1 2//2 3//3"));
        assert_eq!(text.lines().filter(|l| l.starts_with("vn ")).count(), 4);

        let read = read_obj(&path)?;
        assert_eq!(read, mesh);
        Ok(())
    }

    #[test]
    fn test_write_without_normals_and_colors() -> Result<(), ObjError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("plain.obj");

        let mesh = TriangleMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        );
        write_obj(&path, &mesh)?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("\nf 1 2 3\n"));
        assert!(!text.contains("vn"));

        // overwrite silently
        write_obj(&path, &TriangleMesh::default())?;
        let read = read_obj(&path)?;
        assert!(read.is_empty());
        Ok(())
    }

    #[test]
    fn test_read_obj_polygons_and_forms() -> Result<(), ObjError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("poly.obj");
        std::fs::write(
            &path,
            "# a pentagon\n\
             o shape\n\
             v 0 0 0\nv 1 0 0\nv 2 1 0\nv 1 2 0\nv 0 1 0\n\
             vt 0 0\n\
             vn 0 0 1\n\
             f 1/1/1 2/1/1 3/1/1 4/1/1 5/1/1\n\
             f -5 -4 -3\n",
        )?;

        let mesh = read_obj(&path)?;
        assert_eq!(mesh.num_vertices(), 5);
        assert_eq!(mesh.triangles(), &[[0, 1, 2], [0, 2, 3], [0, 3, 4], [0, 1, 2]]);
        assert!(mesh.has_vertex_normals());
        assert!(!mesh.has_vertex_colors());
        Ok(())
    }

    #[test]
    fn test_read_obj_invalid_index() -> Result<(), ObjError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("bad.obj");
        std::fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n")?;

        let res = read_obj(&path);
        assert!(matches!(res, Err(ObjError::InvalidIndex { line: 4, index: 4 })));
        Ok(())
    }

    #[test]
    fn test_read_obj_malformed() -> Result<(), ObjError> {
        let tmp_dir = tempfile::tempdir()?;
        let path = tmp_dir.path().join("bad.obj");
        std::fs::write(&path, "v 0 zero 0\n")?;

        let res = read_obj(&path);
        assert!(matches!(res, Err(ObjError::Parse { line: 1, .. })));
        Ok(())
    }
}
